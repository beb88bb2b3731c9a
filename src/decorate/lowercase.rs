//! Lowercases family names; sonar rejects mixed case.

use super::Decorator;
use crate::model::MetricFamily;

pub struct LowercaseNames;

impl Decorator for LowercaseNames {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            if mf.name.bytes().any(|b| b.is_ascii_uppercase()) || !mf.name.is_ascii() {
                mf.name = mf.name.to_lowercase();
            }
        }
    }

    fn name(&self) -> &str {
        "LowercaseNames"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;

    #[test]
    fn test_lowercase_names() {
        let mut mfs = vec![
            MetricFamily::new("Mixed_Case_Total", "", MetricKind::Counter),
            MetricFamily::new("already_lower", "", MetricKind::Counter),
        ];
        LowercaseNames.decorate(&mut mfs);
        assert_eq!(mfs[0].name, "mixed_case_total");
        assert_eq!(mfs[1].name, "already_lower");
    }
}
