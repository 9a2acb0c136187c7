mod body_scans;
mod completed_scans;
