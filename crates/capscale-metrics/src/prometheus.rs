//! Prometheus text exposition format.
//!
//! Renders an engine snapshot into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::engine::EngineSnapshot;

/// Render an engine snapshot into Prometheus text format.
///
/// Pass outcomes share one counter family with an `outcome` label;
/// per-resource gauges carry a `resource` label.
pub fn render_prometheus(snapshot: &EngineSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP capscale_reconcile_passes_total Reconciliation passes by outcome.\n");
    out.push_str("# TYPE capscale_reconcile_passes_total counter\n");
    for (outcome, value) in [
        ("succeeded", snapshot.passes_succeeded),
        ("transient", snapshot.passes_transient),
        ("permanent", snapshot.passes_permanent),
        ("invalid", snapshot.passes_invalid),
        ("conflict", snapshot.passes_conflict),
        ("busy", snapshot.passes_busy),
    ] {
        out.push_str(&format!(
            "capscale_reconcile_passes_total{{outcome=\"{outcome}\"}} {value}\n"
        ));
    }

    out.push_str("# HELP capscale_scale_actions_total Applied scaling actions by direction.\n");
    out.push_str("# TYPE capscale_scale_actions_total counter\n");
    out.push_str(&format!(
        "capscale_scale_actions_total{{direction=\"up\"}} {}\n",
        snapshot.scale_ups
    ));
    out.push_str(&format!(
        "capscale_scale_actions_total{{direction=\"down\"}} {}\n",
        snapshot.scale_downs
    ));

    out.push_str("# HELP capscale_current_nodes Node count reported by the capacity API.\n");
    out.push_str("# TYPE capscale_current_nodes gauge\n");
    for (id, g) in &snapshot.resources {
        out.push_str(&format!(
            "capscale_current_nodes{{resource=\"{}\"}} {}\n",
            escape_label(id),
            g.current_nodes
        ));
    }

    out.push_str("# HELP capscale_desired_nodes Node count computed by the last pass.\n");
    out.push_str("# TYPE capscale_desired_nodes gauge\n");
    for (id, g) in &snapshot.resources {
        out.push_str(&format!(
            "capscale_desired_nodes{{resource=\"{}\"}} {}\n",
            escape_label(id),
            g.desired_nodes
        ));
    }

    out.push_str("# HELP capscale_utilization_percent Utilization seen by the last pass.\n");
    out.push_str("# TYPE capscale_utilization_percent gauge\n");
    for (id, g) in &snapshot.resources {
        out.push_str(&format!(
            "capscale_utilization_percent{{resource=\"{}\"}} {:.2}\n",
            escape_label(id),
            g.utilization_percent
        ));
    }

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
