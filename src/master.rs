use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::RangeInclusive;
use std::path::Path;
use serde::Serialize;
use crate::cancel::CancelToken;
use crate::codec::{AddressValue, PortValue};
use crate::error::FatalError;
use crate::record_reader::RecordReader;

pub const SERIAL_RANGE: RangeInclusive<u32> = 30000..=30999;

pub fn serial_in_range(serial: u32) -> bool { SERIAL_RANGE.contains(&serial) }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    DeviceSerial,
    DeviceAddress,
    DeviceNetmask,
    DeviceGateway,
    PrimaryAddress,
    PrimaryTimeSource,
    GlobalTimeSource,
    UpdaterAddress,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::DeviceSerial,
        Column::DeviceAddress,
        Column::DeviceNetmask,
        Column::DeviceGateway,
        Column::PrimaryAddress,
        Column::PrimaryTimeSource,
        Column::GlobalTimeSource,
        Column::UpdaterAddress,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Column::DeviceSerial => "MIRA SN",
            Column::DeviceAddress => "PROBE IP",
            Column::DeviceNetmask => "SUBNET MASK",
            Column::DeviceGateway => "GATEWAY",
            Column::PrimaryAddress => "Central 0 IP",
            Column::PrimaryTimeSource => "Central 0 SNTP",
            Column::GlobalTimeSource => "Global NTP List",
            Column::UpdaterAddress => "New Updater IP",
        }
    }
}

fn normalize_label(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMap([usize; 8]);

impl ColumnMap {
    pub fn from_header(row: &[String]) -> Result<Self, FatalError> {
        let mut found: [Option<usize>; 8] = [None; 8];
        let wanted: Vec<String> = Column::ALL.iter().map(|c| normalize_label(c.label())).collect();
        for (idx, cell) in row.iter().enumerate() {
            let name = normalize_label(cell);
            if let Some(j) = wanted.iter().position(|w| *w == name) {
                if found[j].is_some() { return Err(FatalError::DuplicateColumn(cell.trim().to_string())); }
                found[j] = Some(idx);
            }
        }
        let missing: Vec<String> = Column::ALL.iter().zip(found.iter())
            .filter(|(_, f)| f.is_none())
            .map(|(c, _)| c.label().to_string())
            .collect();
        if !missing.is_empty() { return Err(FatalError::MissingColumns(missing)); }
        Ok(Self(found.map(|f| f.unwrap_or_default())))
    }

    pub fn index(&self, col: Column) -> usize { self.0[col as usize] }

    /// Cell for `col`; rows shorter than the header read as empty.
    pub fn cell<'a>(&self, row: &'a [String], col: Column) -> &'a str {
        row.get(self.index(col)).map(|s| s.as_str()).unwrap_or("")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FleetDefaults {
    pub primary_address: AddressValue,
    pub primary_port: PortValue,
    pub primary_time_source: AddressValue,
    pub global_time_source: AddressValue,
    pub updater_address: AddressValue,
    pub updater_port: PortValue,
}

fn parse_address_and_port(text: &str) -> (AddressValue, PortValue) {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 2 { return (AddressValue::INVALID, PortValue::INVALID); }
    (AddressValue::parse(parts[0]), PortValue::parse(parts[1]))
}

impl FleetDefaults {
    pub fn from_row(row: &[String], cols: &ColumnMap) -> Result<Self, FatalError> {
        let (primary_address, primary_port) = parse_address_and_port(cols.cell(row, Column::PrimaryAddress));
        let (updater_address, updater_port) = parse_address_and_port(cols.cell(row, Column::UpdaterAddress));
        let d = Self {
            primary_address,
            primary_port,
            primary_time_source: AddressValue::parse(cols.cell(row, Column::PrimaryTimeSource)),
            global_time_source: AddressValue::parse(cols.cell(row, Column::GlobalTimeSource)),
            updater_address,
            updater_port,
        };
        if !d.primary_address.is_valid() { return Err(FatalError::InvalidDefault("Central 0 IP")); }
        if !d.primary_port.is_valid() { return Err(FatalError::InvalidDefault("Central 0 port")); }
        if !d.primary_time_source.is_valid() { return Err(FatalError::InvalidDefault("Central 0 SNTP")); }
        if !d.global_time_source.is_valid() { return Err(FatalError::InvalidDefault("Global SNTP")); }
        if !d.updater_address.is_valid() { return Err(FatalError::InvalidDefault("New updater server IP")); }
        if !d.updater_port.is_valid() { return Err(FatalError::InvalidDefault("New updater server port")); }
        Ok(d)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub serial: u32,
    pub ip: AddressValue,
    pub netmask: AddressValue,
    pub gateway: AddressValue,
    pub checked: bool,
}

impl DeviceRecord {
    pub fn new(serial: u32, ip: AddressValue, netmask: AddressValue, gateway: AddressValue) -> Self {
        Self { serial, ip, netmask, gateway, checked: false }
    }

    pub fn from_row(row: &[String], cols: &ColumnMap) -> Self {
        Self::new(
            cols.cell(row, Column::DeviceSerial).trim().parse().unwrap_or(0),
            AddressValue::parse(cols.cell(row, Column::DeviceAddress)),
            AddressValue::parse(cols.cell(row, Column::DeviceNetmask)),
            AddressValue::parse(cols.cell(row, Column::DeviceGateway)),
        )
    }

    /// Names of the address fields that failed to parse.
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        let mut out = vec![];
        if !self.ip.is_valid() { out.push("IP"); }
        if !self.netmask.is_valid() { out.push("Netmask"); }
        if !self.gateway.is_valid() { out.push("Gateway"); }
        out
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeviceRecords {
    pub records: BTreeMap<u32, DeviceRecord>,
    pub rows_read: usize,
    pub rows_rejected: usize,
    pub cancelled: bool,
}

impl DeviceRecords {
    fn add(&mut self, row_num: usize, record: DeviceRecord) {
        if record.serial == 0 || !serial_in_range(record.serial) {
            log::error!("Device at master file row {} has no valid serial, skipped", row_num);
            self.rows_rejected += 1;
            return;
        }
        let invalid = record.invalid_fields();
        if !invalid.is_empty() {
            for f in &invalid { log::error!("Device {} (master file row {}) has invalid {}, skipped", record.serial, row_num, f); }
            self.rows_rejected += 1;
            return;
        }
        if self.records.insert(record.serial, record).is_some() {
            log::debug!("Master file row {} replaces an earlier record with the same serial", row_num);
        }
    }
}

/// Reads the master file in three steps: header, defaults row, device rows.
pub struct MasterLoader<R> {
    rows: RecordReader<R>,
    columns: ColumnMap,
    defaults_row: Option<Vec<String>>,
}

impl MasterLoader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, FatalError> {
        let f = File::open(path).map_err(|source| FatalError::MasterOpen { path: path.to_path_buf(), source })?;
        Self::new(BufReader::new(f))
    }
}

impl<R: BufRead> MasterLoader<R> {
    pub fn new(input: R) -> Result<Self, FatalError> {
        let mut rows = RecordReader::new(input);
        let header = rows.read_row()?.unwrap_or_default();
        let columns = ColumnMap::from_header(&header)?;
        log::debug!("Master file columns resolved: {:?}", columns);
        Ok(Self { rows, columns, defaults_row: None })
    }

    pub fn read_defaults(&mut self) -> Result<FleetDefaults, FatalError> {
        let row = self.rows.read_row()?.ok_or(FatalError::InvalidDefault("Defaults row"))?;
        let d = FleetDefaults::from_row(&row, &self.columns)?;
        log::info!(
            "Fleet defaults: central {}:{} sntp {}, global sntp {}, updater {}:{}",
            d.primary_address, d.primary_port, d.primary_time_source, d.global_time_source, d.updater_address, d.updater_port
        );
        self.defaults_row = Some(row);
        Ok(d)
    }

    /// Device rows, starting with the defaults row when it was read.
    pub fn read_records(&mut self, cancel: &CancelToken) -> Result<DeviceRecords, FatalError> {
        let mut out = DeviceRecords::default();
        if let Some(row) = self.defaults_row.take() {
            out.rows_read += 1;
            out.add(self.rows.row_number(), DeviceRecord::from_row(&row, &self.columns));
        }
        loop {
            if cancel.is_cancelled() {
                log::warn!("Master file loading cancelled after {} rows", out.rows_read);
                out.cancelled = true;
                break;
            }
            let Some(row) = self.rows.read_row()? else { break };
            out.rows_read += 1;
            out.add(self.rows.row_number(), DeviceRecord::from_row(&row, &self.columns));
        }
        if out.records.is_empty() && !out.cancelled { return Err(FatalError::NoRecords); }
        Ok(out)
    }
}
