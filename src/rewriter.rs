use std::io::{BufRead, Write};
use quick_xml::events::{BytesStart, BytesText, Event as XmlEvent};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use crate::error::DocumentError;
use crate::master::{DeviceRecord, FleetDefaults};
use crate::rules::{FieldRule, RuleTable, check_field};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub label: &'static str,
    pub expected: String,
    pub observed: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RewriteOutcome {
    pub dirty: bool,
    pub checks_performed: usize,
    pub corrections: Vec<Correction>,
}

/// `Tag(name)`, or `Tag(*)` when the element has no `name` attribute.
fn path_segment(e: &BytesStart) -> Result<String, DocumentError> {
    let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut name = String::new();
    for a in e.attributes() {
        let a = a.map_err(quick_xml::Error::from)?;
        if a.key.as_ref() == b"name" { name = a.unescape_value()?.into_owned(); }
    }
    if name.is_empty() { name.push('*'); }
    Ok(format!("{}({})", tag, name))
}

/// Streams `input` to `output`, replacing the text of every element whose
/// path is in `rules` and whose value differs from what `record` and
/// `defaults` call for. Everything else is copied through as read.
pub fn rewrite<R: BufRead, W: Write>(
    input: R,
    output: W,
    record: &DeviceRecord,
    defaults: &FleetDefaults,
    rules: &RuleTable,
) -> Result<RewriteOutcome, DocumentError> {
    let mut reader = Reader::from_reader(input);
    let mut writer = Writer::new(output);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut pending: Option<&FieldRule> = None;
    let mut outcome = RewriteOutcome::default();
    loop {
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(e) => {
                path.push(path_segment(&e)?);
                pending = rules.lookup(&path.join("/"));
                writer.write_event(XmlEvent::Start(e))?;
            }
            XmlEvent::End(e) => {
                path.pop();
                pending = None;
                writer.write_event(XmlEvent::End(e))?;
            }
            XmlEvent::Empty(e) => {
                pending = None;
                writer.write_event(XmlEvent::Empty(e))?;
            }
            XmlEvent::Text(t) => {
                let observed = t.unescape().map_err(|e| DocumentError::Entity(e.to_string()))?.into_owned();
                let replacement = match pending.take() {
                    Some(rule) => {
                        outcome.checks_performed += 1;
                        let check = check_field(rule.field, record, defaults, &observed);
                        if check.dirty {
                            log::warn!("probe {} - Wrong {}, expected: {} got: {} (FIXING!)", record.serial, rule.label, check.expected, check.observed);
                            outcome.dirty = true;
                            outcome.corrections.push(Correction { label: rule.label, expected: check.expected, observed: check.observed });
                            Some(check.text)
                        } else { None }
                    }
                    None => None,
                };
                match replacement {
                    Some(text) => writer.write_event(XmlEvent::Text(BytesText::new(&text)))?,
                    None => writer.write_event(XmlEvent::Text(t))?,
                }
            }
            e @ (XmlEvent::Decl(_) | XmlEvent::Comment(_) | XmlEvent::CData(_)) => writer.write_event(e)?,
            XmlEvent::PI(_) => return Err(DocumentError::Unsupported("processing instruction")),
            XmlEvent::DocType(_) => return Err(DocumentError::Unsupported("DOCTYPE declaration")),
            XmlEvent::Eof => break,
        }
        buf.clear();
    }
    writer.into_inner().flush()?;
    if outcome.checks_performed != rules.len() {
        log::warn!("Not all due checks have been performed, probe {} ({} of {})", record.serial, outcome.checks_performed, rules.len());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AddressValue, PortValue};
    use crate::rules::RuleSwitches;

    fn record() -> DeviceRecord {
        DeviceRecord::new(30123, AddressValue::parse("10.0.0.5"), AddressValue::parse("255.255.255.0"), AddressValue::parse("10.0.0.1"))
    }

    fn defaults() -> FleetDefaults {
        FleetDefaults {
            primary_address: AddressValue::parse("172.16.0.10"),
            primary_port: PortValue::new(4000),
            primary_time_source: AddressValue::parse("172.16.0.11"),
            global_time_source: AddressValue::parse("172.16.0.12"),
            updater_address: AddressValue::parse("172.16.0.20"),
            updater_port: PortValue::new(5000),
        }
    }

    const STATIC_IP: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<ConfigurationEntries version=\"3\">\n",
        "  <!-- network -->\n",
        "  <Category name=\"Devices\"><Category name=\"Ethernet\">\n",
        "    <Entry name=\"UseDHCP\">0</Entry>\n",
        "    <Entry name=\"StaticIp\">\n",
        "      <Element name=\"Ip Address\">IPVALUE</Element>\n",
        "      <Element name=\"Subnet Mask\">-256</Element>\n",
        "      <Element name=\"Gateway\">167772161</Element>\n",
        "      <Element name=\"Other\" type=\"x\"/>\n",
        "    </Entry>\n",
        "  </Category></Category>\n",
        "</ConfigurationEntries>\n",
    );

    fn run(doc: &str) -> (Result<RewriteOutcome, DocumentError>, String) {
        let rules = RuleTable::new(RuleSwitches::default());
        let mut out = Vec::new();
        let res = rewrite(doc.as_bytes(), &mut out, &record(), &defaults(), &rules);
        (res, String::from_utf8(out).unwrap())
    }

    #[test]
    fn wrong_static_ip_is_corrected() {
        let (res, out) = run(&STATIC_IP.replace("IPVALUE", "10.0.0.9"));
        let o = res.unwrap();
        assert!(o.dirty);
        assert_eq!(o.checks_performed, 4);
        assert_eq!(o.corrections, vec![Correction { label: "Ip Address", expected: "10.0.0.5".into(), observed: "10.0.0.9".into() }]);
        assert!(out.contains("<Element name=\"Ip Address\">167772165</Element>"));
        assert_eq!(out, STATIC_IP.replace("IPVALUE", "167772165"));
    }

    #[test]
    fn matching_document_is_copied_unchanged() {
        let doc = STATIC_IP.replace("IPVALUE", "167772165");
        let (res, out) = run(&doc);
        let o = res.unwrap();
        assert!(!o.dirty);
        assert!(o.corrections.is_empty());
        assert_eq!(out, doc);
    }

    #[test]
    fn element_without_name_uses_wildcard() {
        let doc = "<ConfigurationEntries><Category name=\"System\"><Entry name=\"SerialNr\">1</Entry><Entry name=\"StationId\">30123</Entry></Category></ConfigurationEntries>";
        let (res, out) = run(doc);
        let o = res.unwrap();
        assert!(o.dirty);
        assert_eq!(o.checks_performed, 2);
        assert!(out.contains("<Entry name=\"SerialNr\">30123</Entry>"));
    }

    #[test]
    fn text_after_closing_tag_is_not_checked() {
        let doc = "<ConfigurationEntries><Category name=\"System\"><Entry name=\"SerialNr\"></Entry>tail</Category></ConfigurationEntries>";
        let (res, out) = run(doc);
        let o = res.unwrap();
        assert_eq!(o.checks_performed, 0);
        assert!(!o.dirty);
        assert_eq!(out, doc);
    }

    #[test]
    fn escaped_text_is_preserved() {
        let doc = "<ConfigurationEntries><Note>a &amp; b</Note></ConfigurationEntries>";
        let (res, out) = run(doc);
        assert!(res.is_ok());
        assert_eq!(out, doc);
    }

    #[test]
    fn processing_instruction_aborts() {
        let (res, _) = run("<ConfigurationEntries><?tool run?></ConfigurationEntries>");
        assert!(matches!(res, Err(DocumentError::Unsupported("processing instruction"))));
    }

    #[test]
    fn doctype_aborts() {
        let (res, _) = run("<!DOCTYPE cfg><ConfigurationEntries/>");
        assert!(matches!(res, Err(DocumentError::Unsupported(_))));
    }

    #[test]
    fn undefined_entity_aborts() {
        let (res, _) = run("<ConfigurationEntries><Note>&custom;</Note></ConfigurationEntries>");
        assert!(matches!(res, Err(DocumentError::Entity(_))));
    }

    #[test]
    fn malformed_document_fails() {
        let (res, _) = run("<ConfigurationEntries><Category></Entry></ConfigurationEntries>");
        assert!(matches!(res, Err(DocumentError::Xml(_))));
    }
}
