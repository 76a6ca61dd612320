use serde::Serialize;

/// Cap on example paths retained per category. Summaries are for operator
/// review; anything beyond this is noise on a large corpus.
pub const SAMPLE_CAP: usize = 10;

/// Aggregated outcome of one batch run. Holds counters and bounded path
/// samples only, never document bodies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub scanned: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub errored: usize,
    pub rule_skips: usize,
    pub changed_sample: Vec<String>,
    pub errored_sample: Vec<String>,
    pub rule_skip_sample: Vec<String>,
    pub diff_previews: Vec<String>,
}

impl RunSummary {
    pub fn record_changed(&mut self, relative_path: &str) {
        self.scanned += 1;
        self.changed += 1;
        push_capped(&mut self.changed_sample, relative_path.to_string());
    }

    pub fn record_unchanged(&mut self) {
        self.scanned += 1;
        self.unchanged += 1;
    }

    pub fn record_error(&mut self, relative_path: &str, reason: &str) {
        self.scanned += 1;
        self.errored += 1;
        push_capped(
            &mut self.errored_sample,
            format!("{relative_path}: {reason}"),
        );
    }

    /// A rule skipped one document (absent anchor, drift guard). Not a
    /// document error: the document itself may still have been patched by
    /// other rules.
    pub fn record_rule_skip(&mut self, relative_path: &str, rule_name: &str, reason: &str) {
        self.rule_skips += 1;
        push_capped(
            &mut self.rule_skip_sample,
            format!("{relative_path}: {rule_name}: {reason}"),
        );
    }

    pub fn record_diff_preview(&mut self, preview: String) {
        push_capped(&mut self.diff_previews, preview);
    }

    /// Combine a partial summary into this one. Lets a future worker pool
    /// accumulate per-worker summaries and merge at the end.
    pub fn merge(&mut self, other: RunSummary) {
        self.scanned += other.scanned;
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.errored += other.errored;
        self.rule_skips += other.rule_skips;
        for item in other.changed_sample {
            push_capped(&mut self.changed_sample, item);
        }
        for item in other.errored_sample {
            push_capped(&mut self.errored_sample, item);
        }
        for item in other.rule_skip_sample {
            push_capped(&mut self.rule_skip_sample, item);
        }
        for item in other.diff_previews {
            push_capped(&mut self.diff_previews, item);
        }
    }
}

fn push_capped(sample: &mut Vec<String>, item: String) {
    if sample.len() < SAMPLE_CAP {
        sample.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::{RunSummary, SAMPLE_CAP};

    #[test]
    fn counters_track_each_outcome_once() {
        let mut summary = RunSummary::default();
        summary.record_changed("a.html");
        summary.record_unchanged();
        summary.record_error("b.html", "permission denied");
        summary.record_rule_skip("c.html", "inject-meta", "anchor missing");

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.rule_skips, 1);
        assert_eq!(summary.changed_sample, vec!["a.html".to_string()]);
        assert_eq!(
            summary.errored_sample,
            vec!["b.html: permission denied".to_string()]
        );
    }

    #[test]
    fn samples_are_capped() {
        let mut summary = RunSummary::default();
        for index in 0..SAMPLE_CAP + 5 {
            summary.record_changed(&format!("page-{index}.html"));
        }
        assert_eq!(summary.changed, SAMPLE_CAP + 5);
        assert_eq!(summary.changed_sample.len(), SAMPLE_CAP);
    }

    #[test]
    fn merge_combines_counters_and_respects_cap() {
        let mut left = RunSummary::default();
        let mut right = RunSummary::default();
        for index in 0..8 {
            left.record_changed(&format!("left-{index}.html"));
        }
        for index in 0..8 {
            right.record_changed(&format!("right-{index}.html"));
        }
        right.record_error("broken.html", "not utf-8");

        left.merge(right);
        assert_eq!(left.scanned, 17);
        assert_eq!(left.changed, 16);
        assert_eq!(left.errored, 1);
        assert_eq!(left.changed_sample.len(), SAMPLE_CAP);
    }
}
