/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

*/

//! Report routing: ordered predicate rules mapping each report to the
//! destinations interested in it.

use crate::error::FilterError;

type Rule<R, D> = (Box<dyn Fn(&R) -> bool + Send>, D);

/// Routes reports to destinations through an ordered rule list.
///
/// Every rule is evaluated for every report; matching never
/// short-circuits, so one report can fan out to several destinations.
/// Rule order only determines the order of the returned destinations.
pub struct Filter<R, D: Clone> {
    rules: Vec<Rule<R, D>>,
}

impl<R, D: Clone> Filter<R, D> {
    pub fn new() -> Self {
        Filter { rules: Vec::new() }
    }

    /// Append a rule. Rules are never removed.
    pub fn add_rule(&mut self, predicate: Box<dyn Fn(&R) -> bool + Send>, destination: D) {
        self.rules.push((predicate, destination));
    }

    /// Destinations whose predicate accepts the report, in rule order.
    ///
    /// Routing with zero rules configured is a setup error, not an empty
    /// result. A report no rule accepts routes to nowhere and is dropped
    /// by the caller.
    pub fn route(&self, report: &R) -> Result<Vec<D>, FilterError> {
        if self.rules.is_empty() {
            return Err(FilterError::NoRuleConfigured);
        }
        Ok(self
            .rules
            .iter()
            .filter(|(predicate, _)| predicate(report))
            .map(|(_, destination)| destination.clone())
            .collect())
    }
}

impl<R, D: Clone> Default for Filter<R, D> {
    fn default() -> Self {
        Filter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Record {
        target: String,
    }

    fn system_rule() -> Box<dyn Fn(&Record) -> bool + Send> {
        Box::new(|r: &Record| r.target.starts_with("system"))
    }

    fn all_rule() -> Box<dyn Fn(&Record) -> bool + Send> {
        Box::new(|_: &Record| true)
    }

    #[test]
    fn test_route_without_rules_is_an_error() {
        let filter: Filter<Record, &str> = Filter::new();
        let report = Record {
            target: "system".into(),
        };
        assert!(matches!(
            filter.route(&report),
            Err(FilterError::NoRuleConfigured)
        ));
    }

    #[test]
    fn test_route_fans_out_to_every_matching_rule() {
        let mut filter = Filter::new();
        filter.add_rule(system_rule(), "system-sink");
        filter.add_rule(all_rule(), "archive");

        let report = Record {
            target: "system".into(),
        };
        assert_eq!(filter.route(&report).unwrap(), vec!["system-sink", "archive"]);
    }

    #[test]
    fn test_route_with_no_match_returns_empty() {
        let mut filter = Filter::new();
        filter.add_rule(system_rule(), "system-sink");

        let report = Record {
            target: "firefox".into(),
        };
        assert!(filter.route(&report).unwrap().is_empty());
    }

    #[test]
    fn test_destinations_follow_rule_registration_order() {
        let mut filter = Filter::new();
        filter.add_rule(all_rule(), 1u32);
        filter.add_rule(all_rule(), 2u32);
        filter.add_rule(all_rule(), 3u32);

        let report = Record {
            target: "any".into(),
        };
        assert_eq!(filter.route(&report).unwrap(), vec![1, 2, 3]);
    }
}
