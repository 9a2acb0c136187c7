//! Shutter click played on the flash cue.
//!
//! Output devices are not `Send`, so the stream lives on a dedicated thread that is
//! fed through a channel. Without the `shutter-sound` feature the cue is silent and
//! only the `CaptureCue` event marks the shutter.

use std::sync::{mpsc::Sender, Mutex};

enum AudioCommand {
    Click,
}

pub struct ShutterSound {
    enabled: bool,
    #[cfg_attr(not(feature = "shutter-sound"), allow(dead_code))]
    tx: Mutex<Option<Sender<AudioCommand>>>,
}

impl ShutterSound {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            tx: Mutex::new(None),
        }
    }

    /// Fire and forget. Audio trouble is logged, never surfaced.
    pub fn play(&self) {
        if !self.enabled {
            return;
        }
        match self.ensure_thread() {
            Ok(Some(tx)) => {
                if tx.send(AudioCommand::Click).is_err() {
                    log::warn!("Shutter audio thread is gone");
                }
            }
            Ok(None) => log::debug!("shutter click (audio output not compiled in)"),
            Err(err) => log::warn!("Shutter audio unavailable: {err}"),
        }
    }

    #[cfg(feature = "shutter-sound")]
    fn ensure_thread(&self) -> Result<Option<Sender<AudioCommand>>, String> {
        use rodio::{source::SineWave, OutputStream, Sink, Source};
        use std::thread;
        use std::time::Duration;

        let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = guard.as_ref() {
            return Ok(Some(tx.clone()));
        }

        let (tx, rx) = std::sync::mpsc::channel::<AudioCommand>();
        thread::Builder::new()
            .name("shutter-audio".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(output) => output,
                    Err(e) => {
                        log::warn!("Failed to create audio output stream: {}", e);
                        return;
                    }
                };

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Click => match Sink::try_new(&handle) {
                            Ok(sink) => {
                                sink.append(
                                    SineWave::new(1760.0)
                                        .take_duration(Duration::from_millis(60))
                                        .amplify(0.25),
                                );
                                sink.detach();
                            }
                            Err(e) => log::warn!("Failed to create audio sink: {}", e),
                        },
                    }
                }
            })
            .map_err(|e| e.to_string())?;

        *guard = Some(tx.clone());
        Ok(Some(tx))
    }

    #[cfg(not(feature = "shutter-sound"))]
    fn ensure_thread(&self) -> Result<Option<Sender<AudioCommand>>, String> {
        Ok(None)
    }
}
