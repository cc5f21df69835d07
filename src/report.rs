use chrono::Local;
use comfy_table::{ContentArrangement, Table};
use crate::paint;
use crate::reconcile::RunSummary;

const RULE: &str = "--------------------------------------------------------------------------------";

fn on_off(v: bool) -> &'static str { if v { "ON" } else { "OFF" } }

pub fn render_text(rep: &RunSummary) -> String {
    let mut s = String::new();
    s.push_str(&format!("{}\n{}\n{}\n", RULE, paint("Summary", "1;36"), RULE));
    s.push_str(&format!(
        "Run: {} → {}{}\n",
        rep.started.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        rep.finished.with_timezone(&Local).format("%H:%M:%S"),
        if rep.cancelled { paint(" (cancelled)", "1;33") } else { String::new() }
    ));
    s.push_str(&format!("{}\n", paint("Configuration switches", "1")));
    s.push_str(&format!("    check time intervals: {}\n", on_off(rep.switches.check_time_intervals)));
    s.push_str(&format!("    check service mode  : {}\n", on_off(rep.switches.check_service_mode)));
    s.push_str(&format!("{}\n", paint("Filenames", "1")));
    s.push_str(&format!("    master: {}\n", rep.master_file));
    s.push_str(&format!("    input : {}\n", rep.input_filename));
    s.push_str(&format!("    output: {}\n", rep.output_filename));
    s.push_str(&format!(
        "Master records: {} usable, {} rows rejected\n",
        rep.master_records, rep.master_rows_rejected
    ));

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![paint("Station directories", "1"), paint("Count", "1")]);
    let st = &rep.stats;
    table.add_row(vec!["Total processed".to_string(), st.processed.to_string()]);
    table.add_row(vec!["Skipped: invalid serial (dir name)".to_string(), st.invalid_serial.to_string()]);
    table.add_row(vec!["Skipped: no corresponding master configuration".to_string(), st.no_master_record.to_string()]);
    table.add_row(vec!["Failed to parse/handle configuration XML".to_string(), paint(&st.failed.to_string(), if st.failed > 0 { "31" } else { "0" })]);
    table.add_row(vec!["Fixed into modified_stations".to_string(), paint(&st.corrected.to_string(), if st.corrected > 0 { "33" } else { "0" })]);
    s.push_str(&format!("{}\n", table));

    if rep.unmatched.is_empty() {
        s.push_str("Every master configuration had a station directory.\n");
    } else {
        s.push_str(&format!("{}\n", paint("Master configurations with no corresponding station directory:", "1")));
        for serial in &rep.unmatched { s.push_str(&format!("    {}\n", serial)); }
    }
    s
}

pub fn write_json(path: &str, rep: &RunSummary) -> Result<(), std::io::Error> {
    let data = serde_json::to_vec_pretty(rep).map_err(std::io::Error::other)?;
    std::fs::write(path, data)
}

pub fn write_csv(path: &str, rep: &RunSummary) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["directory", "serial", "status", "corrections", "detail"])?;
    for o in &rep.outcomes {
        let serial = o.serial.map(|s| s.to_string()).unwrap_or_default();
        wtr.write_record([o.directory.clone(), serial, o.status.as_str().to_string(), o.corrections.to_string(), o.detail.clone().unwrap_or_default()])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::codec::{AddressValue, PortValue};
    use crate::master::FleetDefaults;
    use crate::reconcile::{DeviceOutcome, DeviceStatus, RunStats};
    use crate::rules::RuleSwitches;

    fn summary() -> RunSummary {
        RunSummary {
            started: Utc::now(),
            finished: Utc::now(),
            switches: RuleSwitches { check_time_intervals: true, check_service_mode: false },
            master_file: "master.csv".to_string(),
            input_filename: "ConfigV1.5.6ExpriviaN.xml".to_string(),
            output_filename: "ConfigV1.5.6ExpriviaN.xml".to_string(),
            defaults: FleetDefaults {
                primary_address: AddressValue::parse("172.16.0.10"),
                primary_port: PortValue::new(4000),
                primary_time_source: AddressValue::parse("172.16.0.11"),
                global_time_source: AddressValue::parse("172.16.0.12"),
                updater_address: AddressValue::parse("172.16.0.20"),
                updater_port: PortValue::new(5000),
            },
            master_records: 3,
            master_rows_rejected: 1,
            stats: RunStats { processed: 4, invalid_serial: 1, no_master_record: 1, failed: 1, corrected: 1 },
            unmatched: vec![30001, 30007],
            cancelled: false,
            outcomes: vec![
                DeviceOutcome { directory: "30123".into(), serial: Some(30123), status: DeviceStatus::Corrected, corrections: 2, detail: None },
                DeviceOutcome { directory: "x".into(), serial: None, status: DeviceStatus::InvalidSerial, corrections: 0, detail: None },
                DeviceOutcome { directory: "30300".into(), serial: Some(30300), status: DeviceStatus::Failed, corrections: 0, detail: Some("Cannot open, really".into()) },
            ],
        }
    }

    #[test]
    fn text_lists_switches_counters_and_unmatched() {
        let t = render_text(&summary());
        assert!(t.contains("check time intervals: ON"));
        assert!(t.contains("check service mode  : OFF"));
        assert!(t.contains("ConfigV1.5.6ExpriviaN.xml"));
        assert!(t.contains("Total processed"));
        assert!(t.contains("    30001\n"));
        assert!(t.contains("    30007\n"));
    }

    #[test]
    fn json_export_round_trips_counters() {
        let dir = tempfile::TempDir::new().unwrap();
        let p = dir.path().join("summary.json");
        write_json(&p.to_string_lossy(), &summary()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&p).unwrap()).unwrap();
        assert_eq!(v["stats"]["corrected"], 1);
        assert_eq!(v["defaults"]["primary_address"], "172.16.0.10");
        assert_eq!(v["outcomes"][0]["status"], "corrected");
        assert_eq!(v["unmatched"][1], 30007);
    }

    #[test]
    fn csv_export_has_one_row_per_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let p = dir.path().join("devices.csv");
        write_csv(&p.to_string_lossy(), &summary()).unwrap();
        let data = std::fs::read_to_string(&p).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "directory,serial,status,corrections,detail");
        assert_eq!(lines[1], "30123,30123,corrected,2,");
        assert_eq!(lines[2], "x,,invalid_serial,0,");
        assert_eq!(lines[3], "30300,30300,failed,0,\"Cannot open, really\"");
    }
}
