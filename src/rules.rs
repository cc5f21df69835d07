use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::codec::{AddressValue, PortValue};
use crate::master::{DeviceRecord, FleetDefaults};

const ROOT: &str = "ConfigurationEntries(*)";
const SYSTEM: &str = "Category(System)";
const ETHERNET: &str = "Category(Devices)/Category(Ethernet)";
const STATIC_IP: &str = "Category(Devices)/Category(Ethernet)/Entry(StaticIp)";
const TIME_SERVERS: &str = "Category(Communication)/Entry(Time Servers)";
const CENTRALS: &str = "Category(Communication)/Category(Central Connection Information)";
const REPEAT_BASE: &str = "Entry(Communication Time)/Element(Repeat Base)";
const REPEAT_ON_SUCCESS: &str = "Entry(Communication Time)/Element(Repeat On Success)";
const REPEAT_ON_FAILURE: &str = "Entry(Communication Time)/Element(Repeat On Failure)";
const DEVICE_PORT: &str = "Entry(Device List)/Category(Device 0)/Element(TCP/IP: Port / Serial: Address High)";
const DEVICE_IP: &str = "Entry(Device List)/Category(Device 0)/Element(TCP/IP: IP Address / Serial: Address Low)";
const DEVICE_SNTP: &str = "Entry(Device List)/Category(Device 0)/Element(TCP/IP: SNTP Server Ip / Serial: Destination Ip)";

/// Optional rule groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSwitches {
    pub check_time_intervals: bool,
    pub check_service_mode: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RuleGroup { Core, TimeIntervals, ServiceMode }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FieldId {
    SerialNr,
    StationId,
    UseDhcp,
    IpAddress,
    SubnetMask,
    Gateway,
    TimeServer0,
    TimeServer1,
    TimeServer2,
    TimeServer3,
    Central0Enable,
    Central0RepeatBase,
    Central0RepeatOnSuccess,
    Central0RepeatOnFailure,
    Central0Port,
    Central0IpAddress,
    Central0SntpServerIp,
    Central1Enable,
    Central2Enable,
    Central3Enable,
    Central4Enable,
    UpdaterRepeatBase,
    UpdaterRepeatOnSuccess,
    UpdaterRepeatOnFailure,
    UpdaterPort,
    UpdaterIpAddress,
    UpdaterSntpServerIp,
    ServiceModeRepeatBase,
    ServiceModeRepeatOnSuccess,
    ServiceModeRepeatOnFailure,
    ServiceModePort,
    ServiceModeIpAddress,
    ServiceModeSntpServerIp,
}

impl FieldId {
    pub const ALL: [FieldId; 33] = [
        FieldId::SerialNr, FieldId::StationId, FieldId::UseDhcp,
        FieldId::IpAddress, FieldId::SubnetMask, FieldId::Gateway,
        FieldId::TimeServer0, FieldId::TimeServer1, FieldId::TimeServer2, FieldId::TimeServer3,
        FieldId::Central0Enable, FieldId::Central0RepeatBase, FieldId::Central0RepeatOnSuccess, FieldId::Central0RepeatOnFailure,
        FieldId::Central0Port, FieldId::Central0IpAddress, FieldId::Central0SntpServerIp,
        FieldId::Central1Enable, FieldId::Central2Enable, FieldId::Central3Enable, FieldId::Central4Enable,
        FieldId::UpdaterRepeatBase, FieldId::UpdaterRepeatOnSuccess, FieldId::UpdaterRepeatOnFailure,
        FieldId::UpdaterPort, FieldId::UpdaterIpAddress, FieldId::UpdaterSntpServerIp,
        FieldId::ServiceModeRepeatBase, FieldId::ServiceModeRepeatOnSuccess, FieldId::ServiceModeRepeatOnFailure,
        FieldId::ServiceModePort, FieldId::ServiceModeIpAddress, FieldId::ServiceModeSntpServerIp,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FieldId::SerialNr => "SerialNr",
            FieldId::StationId => "StationId",
            FieldId::UseDhcp => "UseDHCP",
            FieldId::IpAddress => "Ip Address",
            FieldId::SubnetMask => "Subnet Mask",
            FieldId::Gateway => "Gateway",
            FieldId::TimeServer0 => "Time Server 0",
            FieldId::TimeServer1 => "Time Server 1",
            FieldId::TimeServer2 => "Time Server 2",
            FieldId::TimeServer3 => "Time Server 3",
            FieldId::Central0Enable => "Central 0 Enable",
            FieldId::Central0RepeatBase => "Central 0 Repeat Base",
            FieldId::Central0RepeatOnSuccess => "Central 0 Repeat On Success",
            FieldId::Central0RepeatOnFailure => "Central 0 Repeat On Failure",
            FieldId::Central0Port => "Central 0 Port",
            FieldId::Central0IpAddress => "Central 0 IP Address",
            FieldId::Central0SntpServerIp => "Central 0 SNTP Server Ip",
            FieldId::Central1Enable => "Central 1 Enable",
            FieldId::Central2Enable => "Central 2 Enable",
            FieldId::Central3Enable => "Central 3 Enable",
            FieldId::Central4Enable => "Central 4 Enable",
            FieldId::UpdaterRepeatBase => "Updater Repeat Base",
            FieldId::UpdaterRepeatOnSuccess => "Updater Repeat On Success",
            FieldId::UpdaterRepeatOnFailure => "Updater Repeat On Failure",
            FieldId::UpdaterPort => "Updater Port",
            FieldId::UpdaterIpAddress => "Updater IP Address",
            FieldId::UpdaterSntpServerIp => "Updater SNTP Server Ip",
            FieldId::ServiceModeRepeatBase => "Service Mode Repeat Base",
            FieldId::ServiceModeRepeatOnSuccess => "Service Mode Repeat On Success",
            FieldId::ServiceModeRepeatOnFailure => "Service Mode Repeat On Failure",
            FieldId::ServiceModePort => "Service Mode Port",
            FieldId::ServiceModeIpAddress => "Service Mode IP Address",
            FieldId::ServiceModeSntpServerIp => "Service Mode SNTP Server Ip",
        }
    }

    /// Element path below the document root.
    fn location(self) -> String {
        const UPDATER: &str = "Category(Special)/Category(Updater)";
        const SERVICE: &str = "Category(Special)/Category(Service Mode)";
        match self {
            FieldId::SerialNr => format!("{SYSTEM}/Entry(SerialNr)"),
            FieldId::StationId => format!("{SYSTEM}/Entry(StationId)"),
            FieldId::UseDhcp => format!("{ETHERNET}/Entry(UseDHCP)"),
            FieldId::IpAddress => format!("{STATIC_IP}/Element(Ip Address)"),
            FieldId::SubnetMask => format!("{STATIC_IP}/Element(Subnet Mask)"),
            FieldId::Gateway => format!("{STATIC_IP}/Element(Gateway)"),
            FieldId::TimeServer0 => format!("{TIME_SERVERS}/Element(Time Server 0)"),
            FieldId::TimeServer1 => format!("{TIME_SERVERS}/Element(Time Server 1)"),
            FieldId::TimeServer2 => format!("{TIME_SERVERS}/Element(Time Server 2)"),
            FieldId::TimeServer3 => format!("{TIME_SERVERS}/Element(Time Server 3)"),
            FieldId::Central0Enable => format!("{CENTRALS}/Category(Central 0)/Entry(Enable)"),
            FieldId::Central0RepeatBase => format!("{CENTRALS}/Category(Central 0)/{REPEAT_BASE}"),
            FieldId::Central0RepeatOnSuccess => format!("{CENTRALS}/Category(Central 0)/{REPEAT_ON_SUCCESS}"),
            FieldId::Central0RepeatOnFailure => format!("{CENTRALS}/Category(Central 0)/{REPEAT_ON_FAILURE}"),
            FieldId::Central0Port => format!("{CENTRALS}/Category(Central 0)/{DEVICE_PORT}"),
            FieldId::Central0IpAddress => format!("{CENTRALS}/Category(Central 0)/{DEVICE_IP}"),
            FieldId::Central0SntpServerIp => format!("{CENTRALS}/Category(Central 0)/{DEVICE_SNTP}"),
            FieldId::Central1Enable => format!("{CENTRALS}/Category(Central 1)/Entry(Enable)"),
            FieldId::Central2Enable => format!("{CENTRALS}/Category(Central 2)/Entry(Enable)"),
            FieldId::Central3Enable => format!("{CENTRALS}/Category(Central 3)/Entry(Enable)"),
            FieldId::Central4Enable => format!("{CENTRALS}/Category(Central 4)/Entry(Enable)"),
            FieldId::UpdaterRepeatBase => format!("{CENTRALS}/{UPDATER}/{REPEAT_BASE}"),
            FieldId::UpdaterRepeatOnSuccess => format!("{CENTRALS}/{UPDATER}/{REPEAT_ON_SUCCESS}"),
            FieldId::UpdaterRepeatOnFailure => format!("{CENTRALS}/{UPDATER}/{REPEAT_ON_FAILURE}"),
            FieldId::UpdaterPort => format!("{CENTRALS}/{UPDATER}/{DEVICE_PORT}"),
            FieldId::UpdaterIpAddress => format!("{CENTRALS}/{UPDATER}/{DEVICE_IP}"),
            FieldId::UpdaterSntpServerIp => format!("{CENTRALS}/{UPDATER}/{DEVICE_SNTP}"),
            FieldId::ServiceModeRepeatBase => format!("{CENTRALS}/{SERVICE}/{REPEAT_BASE}"),
            FieldId::ServiceModeRepeatOnSuccess => format!("{CENTRALS}/{SERVICE}/{REPEAT_ON_SUCCESS}"),
            FieldId::ServiceModeRepeatOnFailure => format!("{CENTRALS}/{SERVICE}/{REPEAT_ON_FAILURE}"),
            FieldId::ServiceModePort => format!("{CENTRALS}/{SERVICE}/{DEVICE_PORT}"),
            FieldId::ServiceModeIpAddress => format!("{CENTRALS}/{SERVICE}/{DEVICE_IP}"),
            FieldId::ServiceModeSntpServerIp => format!("{CENTRALS}/{SERVICE}/{DEVICE_SNTP}"),
        }
    }

    pub fn path(self) -> String { format!("{ROOT}/{}", self.location()) }

    fn group(self) -> RuleGroup {
        match self {
            FieldId::Central0RepeatBase | FieldId::Central0RepeatOnSuccess | FieldId::Central0RepeatOnFailure => RuleGroup::TimeIntervals,
            FieldId::ServiceModeRepeatBase | FieldId::ServiceModeRepeatOnSuccess | FieldId::ServiceModeRepeatOnFailure
            | FieldId::ServiceModePort | FieldId::ServiceModeIpAddress | FieldId::ServiceModeSntpServerIp => RuleGroup::ServiceMode,
            _ => RuleGroup::Core,
        }
    }

    pub fn expected(self, record: &DeviceRecord, defaults: &FleetDefaults) -> Expected {
        use Expected::{Address, Literal, Port};
        match self {
            FieldId::SerialNr | FieldId::StationId => Literal(record.serial.to_string()),
            FieldId::UseDhcp => Literal("0".into()),
            FieldId::IpAddress => Address(record.ip),
            FieldId::SubnetMask => Address(record.netmask),
            FieldId::Gateway => Address(record.gateway),
            FieldId::TimeServer0 => Address(defaults.global_time_source),
            FieldId::TimeServer1 | FieldId::TimeServer2 | FieldId::TimeServer3 => Literal("0".into()),
            FieldId::Central0Enable => Literal("1".into()),
            FieldId::Central0RepeatBase | FieldId::Central0RepeatOnSuccess | FieldId::Central0RepeatOnFailure => Literal("60".into()),
            FieldId::Central0Port => Port(defaults.primary_port),
            FieldId::Central0IpAddress => Address(defaults.primary_address),
            FieldId::Central0SntpServerIp => Address(defaults.primary_time_source),
            FieldId::Central1Enable | FieldId::Central2Enable | FieldId::Central3Enable | FieldId::Central4Enable => Literal("0".into()),
            FieldId::UpdaterRepeatBase | FieldId::ServiceModeRepeatBase => Literal("10".into()),
            FieldId::UpdaterRepeatOnSuccess | FieldId::ServiceModeRepeatOnSuccess => Literal("20".into()),
            FieldId::UpdaterRepeatOnFailure | FieldId::ServiceModeRepeatOnFailure => Literal("30".into()),
            FieldId::UpdaterPort | FieldId::ServiceModePort => Port(defaults.updater_port),
            FieldId::UpdaterIpAddress | FieldId::ServiceModeIpAddress => Address(defaults.updater_address),
            FieldId::UpdaterSntpServerIp | FieldId::ServiceModeSntpServerIp => Address(defaults.primary_time_source),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expected { Literal(String), Address(AddressValue), Port(PortValue) }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldCheck {
    /// Text to write back into the document.
    pub text: String,
    pub dirty: bool,
    pub expected: String,
    pub observed: String,
}

pub fn check_field(field: FieldId, record: &DeviceRecord, defaults: &FleetDefaults, observed: &str) -> FieldCheck {
    match field.expected(record, defaults) {
        Expected::Address(want) => {
            let got = AddressValue::from_packed_text(observed);
            let dirty = got.to_string() != want.to_string();
            FieldCheck {
                text: if dirty { want.to_packed_text() } else { observed.to_string() },
                dirty,
                expected: want.to_string(),
                observed: got.to_string(),
            }
        }
        Expected::Port(want) => {
            let coded = want.to_coded();
            let dirty = coded != observed;
            FieldCheck {
                text: if dirty { coded } else { observed.to_string() },
                dirty,
                expected: want.to_string(),
                observed: PortValue::parse_coded(observed).to_string(),
            }
        }
        Expected::Literal(want) => {
            let dirty = want != observed;
            FieldCheck {
                text: if dirty { want.clone() } else { observed.to_string() },
                dirty,
                expected: want,
                observed: observed.to_string(),
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldRule {
    pub field: FieldId,
    pub label: &'static str,
}

/// Element path to field mapping, built once per run.
#[derive(Clone, Debug)]
pub struct RuleTable {
    rules: HashMap<String, FieldRule>,
    switches: RuleSwitches,
}

impl RuleTable {
    pub fn new(switches: RuleSwitches) -> Self {
        let mut rules = HashMap::new();
        for field in FieldId::ALL {
            let on = match field.group() {
                RuleGroup::Core => true,
                RuleGroup::TimeIntervals => switches.check_time_intervals,
                RuleGroup::ServiceMode => switches.check_service_mode,
            };
            if !on { continue; }
            let prev = rules.insert(field.path(), FieldRule { field, label: field.label() });
            assert!(prev.is_none(), "duplicate rule path for {:?}", field);
        }
        Self { rules, switches }
    }

    pub fn lookup(&self, path: &str) -> Option<&FieldRule> { self.rules.get(path) }

    pub fn len(&self) -> usize { self.rules.len() }

    pub fn switches(&self) -> RuleSwitches { self.switches }
}
