//! Fuzz target: `ThresholdConfig::from_fields`
//!
//! Arbitrary settings-screen input must either parse into finite
//! thresholds or be rejected with a typed error.
//!
//! cargo fuzz run fuzz_threshold_fields

#![no_main]

use glucoguard::config::ThresholdConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut fields = text.splitn(3, ',');
    let severe = fields.next().unwrap_or("");
    let mild = fields.next().unwrap_or("");
    let hyper = fields.next().unwrap_or("");

    if let Ok(t) = ThresholdConfig::from_fields(severe, mild, hyper) {
        assert!(t.severe_hypo.is_finite());
        assert!(t.mild_hypo.is_finite());
        assert!(t.hyper.is_finite());
        let _ = t.is_ordered();
    }
});
