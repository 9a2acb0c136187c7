fn main() -> anyhow::Result<()> {
    bodyscan_lib::run()
}
