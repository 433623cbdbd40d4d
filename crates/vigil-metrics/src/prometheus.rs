//! Prometheus text exposition format.
//!
//! Renders probe snapshots into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::collector::ProbeSnapshot;

fn labels(s: &ProbeSnapshot) -> String {
    format!("probe=\"{}\",type=\"{}\"", s.probe_name, s.probe_type)
}

/// Render probe snapshots into Prometheus text format.
///
/// `vigil_probe_up` is omitted for probes whose last run reached no
/// verdict, so an invocation error never reads as healthy or unhealthy.
pub fn render_prometheus(snapshots: &[ProbeSnapshot]) -> String {
    let mut out = String::new();

    out.push_str("# HELP vigil_probe_up Whether the last conclusive run was healthy.\n");
    out.push_str("# TYPE vigil_probe_up gauge\n");
    for s in snapshots {
        if let Some(up) = s.up {
            out.push_str(&format!("vigil_probe_up{{{}}} {}\n", labels(s), u8::from(up)));
        }
    }

    out.push_str("# HELP vigil_probe_runs_total Probe runs by result.\n");
    out.push_str("# TYPE vigil_probe_runs_total counter\n");
    for s in snapshots {
        for (result, count) in &s.runs {
            out.push_str(&format!(
                "vigil_probe_runs_total{{{},result=\"{}\"}} {}\n",
                labels(s),
                result.label(),
                count
            ));
        }
    }

    out.push_str("# HELP vigil_probe_unhealthy_total Unhealthy runs by failure code.\n");
    out.push_str("# TYPE vigil_probe_unhealthy_total counter\n");
    for s in snapshots {
        for (code, count) in &s.unhealthy_codes {
            out.push_str(&format!(
                "vigil_probe_unhealthy_total{{{},code=\"{}\"}} {}\n",
                labels(s),
                code,
                count
            ));
        }
    }

    out.push_str(
        "# HELP vigil_probe_last_run_timestamp_seconds Unix time the last run was recorded.\n",
    );
    out.push_str("# TYPE vigil_probe_last_run_timestamp_seconds gauge\n");
    for s in snapshots {
        if let Some(at) = s.last_run_epoch_secs {
            out.push_str(&format!(
                "vigil_probe_last_run_timestamp_seconds{{{}}} {:.3}\n",
                labels(s),
                at
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::collector::RunResult;

    fn test_snapshot(name: &str, up: Option<bool>) -> ProbeSnapshot {
        ProbeSnapshot {
            probe_type: "controlplane".to_string(),
            probe_name: name.to_string(),
            runs: vec![
                (RunResult::Healthy, 10),
                (RunResult::Unhealthy, 2),
                (RunResult::Indeterminate, 0),
                (RunResult::Error, 1),
            ],
            unhealthy_codes: BTreeMap::from([("CreateTimeout", 1), ("ReadMismatch", 1)]),
            up,
            last_run_epoch_secs: Some(1_700_000_000.25),
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Should still have type declarations.
        assert!(output.contains("# HELP vigil_probe_up"));
        assert!(output.contains("# TYPE vigil_probe_runs_total counter"));
        assert!(!output.lines().any(|l| !l.starts_with('#')));
    }

    #[test]
    fn render_single_probe() {
        let output = render_prometheus(&[test_snapshot("crud", Some(true))]);

        assert!(output.contains("vigil_probe_up{probe=\"crud\",type=\"controlplane\"} 1"));
        assert!(output.contains(
            "vigil_probe_runs_total{probe=\"crud\",type=\"controlplane\",result=\"healthy\"} 10"
        ));
        assert!(output.contains(
            "vigil_probe_runs_total{probe=\"crud\",type=\"controlplane\",result=\"error\"} 1"
        ));
        assert!(output.contains(
            "vigil_probe_unhealthy_total{probe=\"crud\",type=\"controlplane\",code=\"CreateTimeout\"} 1"
        ));
        assert!(output.contains(
            "vigil_probe_last_run_timestamp_seconds{probe=\"crud\",type=\"controlplane\"} 1700000000.250"
        ));
    }

    #[test]
    fn unknown_verdict_has_no_up_line() {
        let output = render_prometheus(&[
            test_snapshot("known", Some(false)),
            test_snapshot("unknown", None),
        ]);
        assert!(output.contains("vigil_probe_up{probe=\"known\",type=\"controlplane\"} 0"));
        assert!(!output.contains("vigil_probe_up{probe=\"unknown\""));
        assert!(output.contains("vigil_probe_runs_total{probe=\"unknown\""));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&[test_snapshot("test", Some(true))]);

        // Every non-empty, non-comment line should match: metric_name{labels} value
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains('}'),
                "line should have labels: {line}"
            );
            let value = line.rsplit(' ').next().unwrap();
            assert!(value.parse::<f64>().is_ok(), "bad value in: {line}");
        }
    }
}
