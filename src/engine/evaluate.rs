//! Phase and rule evaluation.
//!
//! Rules run in insertion order. Chain links are only reached through
//! their root; disruptive and flow actions run once on the root after
//! every link matched.

use crate::actions::{ActionType, AllowType};
use crate::config::RuleEngineMode;
use crate::metadata::MetadataSet;
use crate::variables::{MatchData, Variable};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::matched::MatchedRule;
use super::phase::Phase;
use super::rule::{Rule, VariableTarget};
use super::transaction::Transaction;

impl Transaction {
    /// Evaluate every rule scheduled in `phase`.
    pub(crate) fn eval_phase(&mut self, phase: Phase) {
        let waf = Arc::clone(&self.waf);
        let started = Instant::now();

        if phase > Phase::RequestBody && self.allow == Some(AllowType::Request) {
            self.allow = None;
        }
        if self.is_allowed(phase) {
            debug!(tx_id = %self.id, phase = phase.number(), "phase skipped by allow");
        } else {
            debug!(tx_id = %self.id, phase = phase.number(), "evaluating phase");
            for rule in waf.rules.rules() {
                if self.interruption.is_some() && phase != Phase::Logging {
                    break;
                }
                if self.config.rule_engine == RuleEngineMode::Off || self.is_allowed(phase) {
                    break;
                }
                if rule.is_chain_child() || !rule.runs_in(phase) {
                    continue;
                }
                if self.removed_rules.iter().any(|f| f.matches(rule)) {
                    trace!(rule_id = rule.id, "rule removed for this transaction");
                    continue;
                }
                if let Some(label) = &self.skip_after {
                    if rule.sec_mark.as_deref() == Some(label.as_str()) {
                        trace!(marker = %label, "reached skipAfter marker");
                        self.skip_after = None;
                    }
                    continue;
                }
                if self.skip > 0 {
                    self.skip -= 1;
                    continue;
                }
                if rule.is_marker() {
                    continue;
                }

                self.reset_matched_vars();
                self.eval_root(rule, phase);
                self.capturing = false;
            }
        }

        if self.allow == Some(AllowType::Phase) {
            self.allow = None;
        }
        if let Some(label) = self.skip_after.take() {
            debug!(marker = %label, phase = phase.number(), "skipAfter marker not found in phase");
        }
        self.skip = 0;
        self.stopwatch.push((phase, started.elapsed()));
    }

    fn is_allowed(&self, phase: Phase) -> bool {
        match self.allow {
            Some(AllowType::All) => phase != Phase::Logging,
            Some(AllowType::Request) => phase <= Phase::RequestBody,
            Some(AllowType::Phase) => true,
            None => false,
        }
    }

    fn reset_matched_vars(&mut self) {
        for v in [
            Variable::MatchedVar,
            Variable::MatchedVarName,
            Variable::MatchedVars,
            Variable::MatchedVarsNames,
        ] {
            self.vars.reset(v);
        }
    }

    fn set_matched_var(&mut self, m: &MatchData) {
        let name = m.full_name();
        self.vars.set(Variable::MatchedVar, m.value.clone());
        self.vars.set(Variable::MatchedVarName, name.clone());
        self.vars.add(Variable::MatchedVars, &name, m.value.clone());
        self.vars.add(Variable::MatchedVarsNames, &name, name.clone());
    }

    fn set_rule_vars(&mut self, rule: &Rule) {
        let Some(map) = self.vars.map_mut(Variable::Rule) else {
            return;
        };
        map.reset();
        map.set("id", vec![rule.id.to_string()]);
        map.set("rev", vec![rule.metadata.rev.clone()]);
        map.set("ver", vec![rule.metadata.ver.clone()]);
        map.set("msg", vec![rule.msg_text().to_string()]);
        map.set(
            "logdata",
            vec![rule
                .metadata
                .logdata
                .as_ref()
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()],
        );
        if let Some(severity) = rule.metadata.severity {
            map.set("severity", vec![severity.level().to_string()]);
        }
        map.set("phase", vec![rule.phase.to_string()]);
    }

    /// Runtime target exclusions that apply to `rule`.
    fn target_exceptions_for(&self, rule: &Rule) -> Vec<VariableTarget> {
        self.target_exceptions
            .iter()
            .filter(|(filter, _)| filter.matches(rule))
            .map(|(_, target)| target.clone())
            .collect()
    }

    fn eval_root(&mut self, rule: &Rule, phase: Phase) {
        if rule.id != 0 {
            self.set_rule_vars(rule);
        }
        let exceptions = self.target_exceptions_for(rule);

        let Some(mut matched) = self.eval_rule(rule, 0, &exceptions) else {
            return;
        };
        let mut link = rule.chain.as_deref();
        let mut level = 0;
        while let Some(child) = link {
            level += 1;
            match self.eval_rule(child, level, &exceptions) {
                Some(more) => matched.extend(more),
                None => {
                    trace!(rule_id = rule.id, level, "chain link did not match");
                    return;
                }
            }
            link = child.chain.as_deref();
        }

        let interrupted_before = self.interruption.is_some();
        if self.config.rule_engine != RuleEngineMode::Off {
            for action in &rule.actions {
                if matches!(action.action_type(), ActionType::Disruptive | ActionType::Flow) {
                    action.evaluate(rule, self);
                }
            }
        }
        let status = match &self.interruption {
            Some(i) if !interrupted_before && i.rule_id == rule.log_id() => Some(i.status),
            _ => None,
        };
        self.record_match(rule, phase, matched, status);
    }

    /// Evaluate one link; `None` when nothing matched.
    fn eval_rule(
        &mut self,
        rule: &Rule,
        level: usize,
        exceptions: &[VariableTarget],
    ) -> Option<Vec<MatchData>> {
        self.capturing = rule.capture;

        let Some(op) = &rule.operator else {
            trace!(rule_id = rule.log_id(), "unconditional rule");
            self.run_non_disruptive(rule);
            return Some(Vec::new());
        };

        let extra: Vec<&VariableTarget> = exceptions.iter().collect();
        let mut matches = Vec::new();
        for selector in &rule.variables {
            for value in selector.select(&self.vars, &extra) {
                if let Some(filter) = rule.metadata_filter {
                    if value.variable.is_args()
                        && !MetadataSet::classify(&value.value).intersects(filter)
                    {
                        continue;
                    }
                }
                let inputs = if rule.multi_match {
                    rule.transformations.apply_all(&value.value)
                } else {
                    vec![rule.transformations.apply(&value.value).into_owned()]
                };
                for input in inputs {
                    let hit = op.operator.evaluate(self, &input) != op.negated;
                    trace!(
                        rule_id = rule.log_id(),
                        variable = %value.full_name(),
                        operator = %op.name,
                        hit,
                        "operator evaluated"
                    );
                    if !hit {
                        continue;
                    }
                    let mut m = MatchData {
                        value: input,
                        chain_level: level,
                        ..value.clone()
                    };
                    self.set_matched_var(&m);
                    m.message = self.expand_msg(rule);
                    m.data = self.expand_logdata(rule);
                    self.run_non_disruptive(rule);
                    matches.push(m);
                }
            }
        }
        (!matches.is_empty()).then_some(matches)
    }

    fn run_non_disruptive(&mut self, rule: &Rule) {
        for action in &rule.actions {
            if action.action_type() == ActionType::NonDisruptive {
                action.evaluate(rule, self);
            }
        }
    }

    fn expand_msg(&self, rule: &Rule) -> String {
        rule.metadata
            .msg
            .as_ref()
            .map(|m| m.expand(&self.vars))
            .unwrap_or_default()
    }

    fn expand_logdata(&self, rule: &Rule) -> String {
        rule.metadata
            .logdata
            .as_ref()
            .map(|m| m.expand(&self.vars))
            .unwrap_or_default()
    }

    fn record_match(&mut self, rule: &Rule, phase: Phase, matched: Vec<MatchData>, status: Option<u16>) {
        let (message, data) = match matched.iter().find(|m| m.chain_level == 0) {
            Some(m) => (m.message.clone(), m.data.clone()),
            None => (self.expand_msg(rule), self.expand_logdata(rule)),
        };
        let mut record = MatchedRule::new(rule, phase.number(), message, data, matched);
        record.status = status;
        record.transaction_id = self.id.clone();
        record.client_ip = self.vars.get(Variable::RemoteAddr).to_string();
        record.server_name = self.vars.get(Variable::ServerName).to_string();
        record.uri = self.vars.get(Variable::RequestUri).to_string();

        if let Some(severity) = rule.metadata.severity {
            if severity.level() < self.highest_severity {
                self.highest_severity = severity.level();
                self.vars
                    .set(Variable::HighestSeverity, self.highest_severity.to_string());
            }
        }
        if rule.audit_log {
            self.audit = true;
        }
        debug!(
            tx_id = %self.id,
            rule_id = rule.id,
            phase = phase.number(),
            msg = %record.message,
            "rule matched"
        );
        if rule.log {
            if let Some(callback) = &self.waf.error_callback {
                callback(&record);
            }
        }
        self.matched_rules.push(record);
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{InterruptionAction, Waf};

    fn waf(rules: &str) -> Waf {
        Waf::from_string(rules).unwrap()
    }

    fn ids(tx: &crate::engine::Transaction) -> Vec<i32> {
        tx.matched_rules().iter().map(|m| m.rule_id).collect()
    }

    #[test]
    fn test_deny_by_remote_addr() {
        let waf = waf(r#"
            SecRuleEngine On
            SecDefaultAction "phase:1,deny,status:403,log"
            SecRule REMOTE_ADDR "^127.*" "id:1,phase:1"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_connection("127.0.0.1", 0, "", 0);
        let it = tx.process_request_headers().unwrap();
        assert_eq!(it.status, 403);
        assert_eq!(it.rule_id, 1);
        assert_eq!(it.action, InterruptionAction::Deny);
        assert_eq!(ids(&tx), vec![1]);
    }

    #[test]
    fn test_skip_after_marker() {
        let waf = waf(r#"
            SecRuleEngine On
            SecAction "phase:1,id:1,log,skipAfter:M"
            SecAction "phase:1,id:2,deny,status:403"
            SecMarker M
            SecAction "phase:2,id:3,deny,status:403,log"
        "#);
        let mut tx = waf.new_transaction();
        assert!(tx.process_request_headers().is_none());
        let it = tx.process_request_body().unwrap().unwrap();
        assert_eq!((it.rule_id, it.status), (3, 403));
    }

    #[test]
    fn test_skip_counter() {
        let waf = waf(r#"
            SecAction "phase:1,id:1,pass,nolog,skip:1"
            SecAction "phase:1,id:2,pass,nolog"
            SecAction "phase:1,id:3,pass,nolog"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        assert_eq!(ids(&tx), vec![1, 3]);
    }

    #[test]
    fn test_detection_only_does_not_interrupt() {
        let waf = waf(r#"
            SecRuleEngine DetectionOnly
            SecRule REQUEST_URI "@contains admin" "id:10,phase:1,deny,log,setvar:tx.hit=1"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/admin", "GET", "HTTP/1.1");
        assert!(tx.process_request_headers().is_none());
        assert_eq!(ids(&tx), vec![10]);
        assert_eq!(tx.variables().first(crate::variables::Variable::Tx, "hit"), Some("1"));
    }

    #[test]
    fn test_chain_requires_every_link() {
        let waf = waf(r#"
            SecRuleEngine On
            SecRule ARGS "123" "id:1,phase:1,log,chain"
                SecRule &ARGS "@gt 0" "chain"
                SecRule ARGS "456" "setvar:tx.test=ok"
            SecRule ARGS "123" "id:2,phase:1,log,chain"
                SecRule &ARGS "@gt 100" "chain"
                SecRule ARGS "456" "setvar:tx.test2=ok"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/?test1=123&test2=456", "GET", "HTTP/1.1");
        tx.process_request_headers();
        assert_eq!(ids(&tx), vec![1]);
        let vars = tx.variables();
        assert_eq!(vars.first(crate::variables::Variable::Tx, "test"), Some("ok"));
        assert_eq!(vars.first(crate::variables::Variable::Tx, "test2"), None);
    }

    #[test]
    fn test_capture_and_macro_expansion() {
        let waf = waf(r#"
            SecRule ARGS:id "@rx ^(\d+)-(\w+)$" "id:5,phase:1,pass,capture,log,msg:'got %{TX.1} and %{tx.2}',logdata:'%{MATCHED_VAR_NAME}'"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/?id=42-abc", "GET", "HTTP/1.1");
        tx.process_request_headers();
        let m = &tx.matched_rules()[0];
        assert_eq!(m.message, "got 42 and abc");
        assert_eq!(m.data, "ARGS:id");
    }

    #[test]
    fn test_negated_operator_and_transformations() {
        let waf = waf(r#"
            SecRule REQUEST_METHOD "!@streq GET" "id:1,phase:1,pass,log,t:uppercase"
            SecRule ARGS "@streq select" "id:2,phase:1,pass,log,t:lowercase,t:removeWhitespace"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/?q=SEL%20ECT", "get", "HTTP/1.1");
        tx.process_request_headers();
        assert_eq!(ids(&tx), vec![2]);
    }

    #[test]
    fn test_multi_match_sees_intermediate_values() {
        let waf = waf(r#"
            SecRule ARGS "@streq a%20b" "id:1,phase:1,pass,log,multiMatch,t:urlDecode"
            SecRule ARGS "@streq a%20b" "id:2,phase:1,pass,log,t:urlDecode"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/?x=a%2520b", "GET", "HTTP/1.1");
        tx.process_request_headers();
        assert_eq!(ids(&tx), vec![1]);
    }

    #[test]
    fn test_allow_stops_request_phases() {
        let waf = waf(r#"
            SecRuleEngine On
            SecRule REMOTE_ADDR "@ipMatch 10.0.0.0/8" "id:1,phase:1,allow:request,nolog"
            SecAction "id:2,phase:2,deny,status:403"
            SecAction "id:3,phase:3,pass,log"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_connection("10.1.2.3", 1234, "10.0.0.1", 80);
        tx.process_request_headers();
        assert!(tx.process_request_body().unwrap().is_none());
        tx.process_response_headers(200, "HTTP/1.1");
        assert_eq!(ids(&tx), vec![1, 3]);
    }

    #[test]
    fn test_interruption_is_not_overwritten() {
        let waf = waf(r#"
            SecRuleEngine On
            SecAction "id:1,phase:1,deny,status:401"
            SecAction "id:2,phase:1,deny,status:402"
            SecAction "id:3,phase:5,pass,log"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        tx.process_request_body().unwrap();
        tx.process_logging();
        let it = tx.interruption().unwrap();
        assert_eq!((it.rule_id, it.status), (1, 401));
        assert_eq!(ids(&tx), vec![1, 3]);
    }

    #[test]
    fn test_ctl_rule_remove_and_target_exclusion() {
        let waf = waf(r#"
            SecRuleEngine On
            SecRule REQUEST_URI "@beginsWith /api" "id:1,phase:1,pass,nolog,ctl:ruleRemoveById=2,ctl:ruleRemoveTargetById=3;ARGS:token"
            SecRule ARGS "@contains x" "id:2,phase:1,deny"
            SecRule ARGS "@contains x" "id:3,phase:1,deny"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/api?token=xyz", "GET", "HTTP/1.1");
        assert!(tx.process_request_headers().is_none());

        let mut tx = waf.new_transaction();
        tx.process_uri("/api?token=xyz&other=x", "GET", "HTTP/1.1");
        let it = tx.process_request_headers().unwrap();
        assert_eq!(it.rule_id, 3);
    }

    #[test]
    fn test_highest_severity_and_rule_vars() {
        let waf = waf(r#"
            SecAction "id:1,phase:1,pass,log,severity:WARNING"
            SecAction "id:2,phase:1,pass,log,severity:CRITICAL,msg:'rule %{RULE.id}'"
            SecAction "id:3,phase:1,pass,log,severity:NOTICE"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        assert_eq!(tx.variables().get(crate::variables::Variable::HighestSeverity), "2");
        assert_eq!(tx.matched_rules()[1].message, "rule 2");
    }

    #[test]
    fn test_engine_off_evaluates_nothing() {
        let waf = waf(r#"
            SecRuleEngine Off
            SecAction "id:1,phase:1,deny"
        "#);
        let mut tx = waf.new_transaction();
        assert!(tx.process_request_headers().is_none());
        assert!(tx.matched_rules().is_empty());
    }

    #[test]
    fn test_skip_counts_markers() {
        let waf = waf(r#"
            SecAction "id:1,phase:1,pass,nolog,skip:1"
            SecMarker A
            SecAction "id:2,phase:1,pass,nolog"
            SecAction "id:3,phase:1,pass,nolog,skip:2"
            SecAction "id:4,phase:1,pass,nolog"
            SecMarker B
            SecAction "id:5,phase:1,pass,nolog"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_request_headers();
        assert_eq!(ids(&tx), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_metadata_filter_limits_argument_values() {
        let waf = waf(r#"
            SecRule ARGS "@rx ^\w+$" "id:1,phase:1,pass,log,tag:'metadatafilter/numeric'"
        "#);
        let mut tx = waf.new_transaction();
        tx.process_uri("/?a=abc&b=123", "GET", "HTTP/1.1");
        tx.process_request_headers();
        let m = &tx.matched_rules()[0];
        assert_eq!(m.matched_data.len(), 1);
        assert_eq!(m.matched_data[0].value, "123");
    }
}
