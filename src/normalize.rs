//! Typed view of vnstat's `--json` output.
//!
//! Only the fields the API exposes are modelled. Unknown fields are dropped,
//! missing ones come through as absent, and the only structural requirement
//! is the top-level `interfaces` list.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnstatversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonversion: Option<String>,
    pub interfaces: Vec<InterfaceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub created: Option<Moment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<Moment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub traffic: Traffic,
}

/// A point in time as vnstat reports it: any of date, time and unix timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<CalendarDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<ClockTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarDate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traffic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Counter>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub fiveminute: Vec<TrafficEntry>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub hour: Vec<TrafficEntry>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub day: Vec<TrafficEntry>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub month: Vec<TrafficEntry>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub year: Vec<TrafficEntry>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub top: Vec<TrafficEntry>,
}

/// Received / transmitted byte counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(default)]
    pub rx: Option<u64>,
    #[serde(default)]
    pub tx: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<CalendarDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<ClockTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub rx: Option<u64>,
    #[serde(default)]
    pub tx: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceSummary {
    pub name: Option<String>,
    pub alias: Option<String>,
    pub created: Option<Moment>,
}

/// Result of the short traffic-rate sample (`vnstat -tr`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSample {
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub sampletime: Option<u64>,
    #[serde(default)]
    pub rx: Option<Rate>,
    #[serde(default)]
    pub tx: Option<Rate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratestring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytespersecond: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packetspersecond: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packets: Option<u64>,
}

/// vnstat writes `null` for some empty sections; treat it like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Mirrors [`TrafficSnapshot`] but lets a missing `interfaces` list through
/// so it can be reported distinctly from a type mismatch.
#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    vnstatversion: Option<String>,
    #[serde(default)]
    jsonversion: Option<String>,
    #[serde(default)]
    interfaces: Option<Vec<InterfaceRecord>>,
}

pub fn normalize_snapshot(raw: &[u8]) -> Result<TrafficSnapshot, GatewayError> {
    let parsed: RawSnapshot = serde_json::from_slice(raw).map_err(|e| {
        log::error!("failed to parse vnstat snapshot: {e}");
        GatewayError::malformed(e.to_string())
    })?;

    let interfaces = parsed.interfaces.ok_or_else(|| {
        log::error!("vnstat output has no interfaces list");
        GatewayError::malformed("missing interfaces list")
    })?;

    Ok(TrafficSnapshot {
        vnstatversion: parsed.vnstatversion,
        jsonversion: parsed.jsonversion,
        interfaces,
    })
}

pub fn summarize(snapshot: &TrafficSnapshot) -> Vec<InterfaceSummary> {
    snapshot
        .interfaces
        .iter()
        .map(|iface| InterfaceSummary {
            name: iface.name.clone(),
            alias: iface.alias.clone(),
            created: iface.created.clone(),
        })
        .collect()
}

pub fn normalize_sample(raw: &[u8]) -> Result<LiveSample, GatewayError> {
    let sample: LiveSample = serde_json::from_slice(raw).map_err(|e| {
        log::error!("failed to parse vnstat live sample: {e}");
        GatewayError::malformed(e.to_string())
    })?;

    if sample.rx.is_none() && sample.tx.is_none() {
        log::error!("vnstat live sample has neither rx nor tx");
        return Err(GatewayError::malformed("sample without rx/tx"));
    }
    Ok(sample)
}

/// First non-empty line of `vnstat --version`, e.g. `vnStat 2.10 by Teemu Toivola`.
pub fn tool_version(raw: &[u8]) -> Option<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const SAMPLE: &str = r#"{
        "vnstatversion": "2.10",
        "jsonversion": "2",
        "interfaces": [
            {
                "name": "eth0",
                "alias": "uplink",
                "created": {"date": {"year": 2023, "month": 3, "day": 14}, "timestamp": 1678752000},
                "updated": {"date": {"year": 2024, "month": 5, "day": 1}, "time": {"hour": 12, "minute": 5}, "timestamp": 1714565100},
                "traffic": {
                    "total": {"rx": 987654321012, "tx": 123456789098},
                    "fiveminute": [{"id": 9, "date": {"year": 2024, "month": 5, "day": 1}, "time": {"hour": 12, "minute": 0}, "timestamp": 1714564800, "rx": 1024, "tx": 2048}],
                    "hour": [{"id": 1, "date": {"year": 2024, "month": 5, "day": 1}, "time": {"hour": 11, "minute": 0}, "timestamp": 1714561200, "rx": 73400320, "tx": 10485760}],
                    "day": [{"id": 2, "date": {"year": 2024, "month": 5, "day": 1}, "timestamp": 1714521600, "rx": 1073741824, "tx": 268435456}],
                    "month": [{"id": 3, "date": {"year": 2024, "month": 5}, "timestamp": 1714521600, "rx": 53687091200, "tx": 5368709120}],
                    "year": [{"id": 4, "date": {"year": 2024}, "timestamp": 1704067200, "rx": 214748364800, "tx": 21474836480}],
                    "top": []
                },
                "future_field": {"anything": true}
            },
            {
                "name": "wg0",
                "alias": "",
                "created": {"date": {"year": 2024, "month": 1, "day": 2}},
                "traffic": {"total": {"rx": 42, "tx": 7}}
            }
        ]
    }"#;

    fn numbers(value: &Value, out: &mut Vec<u64>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    if k == "rx" || k == "tx" {
                        out.push(v.as_u64().unwrap());
                    } else {
                        numbers(v, out);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|v| numbers(v, out)),
            _ => {}
        }
    }

    #[test]
    fn snapshot_preserves_names_and_counters() {
        let snapshot = normalize_snapshot(SAMPLE.as_bytes()).unwrap();
        assert_eq!(snapshot.vnstatversion.as_deref(), Some("2.10"));

        let reserialized = serde_json::to_value(&snapshot).unwrap();
        let original: Value = serde_json::from_str(SAMPLE).unwrap();

        let names: Vec<_> = reserialized["interfaces"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("eth0"), json!("wg0")]);

        let (mut before, mut after) = (Vec::new(), Vec::new());
        numbers(&original, &mut before);
        numbers(&reserialized, &mut after);
        assert_eq!(before, after);
        assert!(after.contains(&987654321012));
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let snapshot = normalize_snapshot(SAMPLE.as_bytes()).unwrap();
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["interfaces"][0].get("future_field").is_none());
    }

    #[test]
    fn missing_fields_become_absent() {
        let snapshot = normalize_snapshot(br#"{"interfaces": [{"name": "lo"}]}"#).unwrap();
        let iface = &snapshot.interfaces[0];
        assert_eq!(iface.name.as_deref(), Some("lo"));
        assert_eq!(iface.alias, None);
        assert_eq!(iface.created, None);
        assert_eq!(iface.traffic, Traffic::default());
        assert_eq!(snapshot.vnstatversion, None);
    }

    #[test]
    fn partial_dates_and_times_are_kept() {
        let raw = br#"{"interfaces": [{
            "name": "eth0",
            "created": {"date": {"month": 3, "day": 1}},
            "traffic": {"hour": [{"id": 1, "time": {"minute": 0}, "rx": 5, "tx": 6}]}
        }]}"#;
        let snapshot = normalize_snapshot(raw).unwrap();
        let iface = &snapshot.interfaces[0];

        let created = iface.created.as_ref().and_then(|m| m.date.as_ref()).unwrap();
        assert_eq!(created.year, None);
        assert_eq!(created.month, Some(3));

        let hour = &iface.traffic.hour[0];
        assert_eq!(hour.time.as_ref().unwrap().hour, None);
        assert_eq!(hour.time.as_ref().unwrap().minute, Some(0));
        assert_eq!((hour.rx, hour.tx), (Some(5), Some(6)));

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["interfaces"][0]["created"], json!({"date": {"month": 3, "day": 1}}));
    }

    #[test]
    fn null_sections_are_empty() {
        let raw = br#"{"interfaces": [
            {"name": "eth0", "traffic": null},
            {"name": "wg0", "traffic": {"total": {"rx": 1, "tx": 2}, "day": null, "top": null}}
        ]}"#;
        let snapshot = normalize_snapshot(raw).unwrap();
        assert_eq!(snapshot.interfaces[0].traffic, Traffic::default());

        let wg0 = &snapshot.interfaces[1].traffic;
        assert_eq!(wg0.total, Some(Counter { rx: Some(1), tx: Some(2) }));
        assert!(wg0.day.is_empty());
        assert!(wg0.top.is_empty());
    }

    #[test]
    fn missing_interface_list_is_malformed() {
        let err = normalize_snapshot(br#"{"vnstatversion": "2.10"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedToolOutput { .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        let cases: [&[u8]; 3] = [b"vnstat: database not found", b"", b"[1,2,3]"];
        for raw in cases {
            assert!(matches!(
                normalize_snapshot(raw),
                Err(GatewayError::MalformedToolOutput { .. })
            ));
        }
        let wrong_type = br#"{"interfaces": [{"name": "eth0", "traffic": {"total": {"rx": "lots"}}}]}"#;
        assert!(normalize_snapshot(wrong_type).is_err());
    }

    #[test]
    fn summary_is_ordered_projection() {
        let snapshot = normalize_snapshot(SAMPLE.as_bytes()).unwrap();
        let summary = summarize(&snapshot);

        assert_eq!(summary.len(), snapshot.interfaces.len());
        for (s, iface) in summary.iter().zip(&snapshot.interfaces) {
            assert_eq!(s.name, iface.name);
            assert_eq!(s.alias, iface.alias);
            assert_eq!(s.created, iface.created);
        }

        let value = serde_json::to_value(&summary[1]).unwrap();
        assert_eq!(value, json!({"name": "wg0", "alias": "", "created": {"date": {"year": 2024, "month": 1, "day": 2}}}));
    }

    #[test]
    fn live_sample_parses_rates() {
        let raw = br#"{"jsonversion":"2","vnstatversion":"2.10","interface":"eth0","sampletime":2,
            "rx":{"ratestring":"1.20 Mbit/s","bytespersecond":150000,"packetspersecond":120,"bytes":300000,"packets":240},
            "tx":{"ratestring":"80 kbit/s","bytespersecond":10000,"packetspersecond":30,"bytes":20000,"packets":60}}"#;
        let sample = normalize_sample(raw).unwrap();
        assert_eq!(sample.interface.as_deref(), Some("eth0"));
        assert_eq!(sample.sampletime, Some(2));
        assert_eq!(sample.rx.unwrap().bytespersecond, Some(150000));
        assert_eq!(sample.tx.unwrap().packets, Some(60));
    }

    #[test]
    fn live_sample_without_rates_is_malformed() {
        assert!(matches!(
            normalize_sample(br#"{"interface": "eth0"}"#),
            Err(GatewayError::MalformedToolOutput { .. })
        ));
    }

    #[test]
    fn version_line() {
        assert_eq!(
            tool_version(b"\nvnStat 2.10 by Teemu Toivola <tst at iki dot fi>\n").as_deref(),
            Some("vnStat 2.10 by Teemu Toivola <tst at iki dot fi>")
        );
        assert_eq!(tool_version(b"  \n"), None);
    }
}
