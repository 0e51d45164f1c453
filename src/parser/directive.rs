//! Directive registry.
//!
//! Each directive name (lowercase) maps to a handler receiving the parser
//! and the option text that followed the name.

use super::action::{parse_actions, validate_default_actions};
use super::lexer::{next_field, unquote};
use super::variable::apply_variables;
use super::{Parser, ParserMode};
use crate::actions::{Action, DataAction, FlowAction, MetadataAction};
use crate::audit::AuditLogParts;
use crate::config::{
    parse_octal, parse_on_off, parse_size, AuditEngineMode, AuditLogFormat, AuditLogType,
    BodyLimitAction, RemoteRulesFailAction, RuleEngineMode,
};
use crate::engine::{IdRange, Rule, RuleFilter};
use crate::error::{Error, Result};
use crate::operators::compile_regex;
use phf::phf_map;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Directive handler.
pub type DirectiveHandler = fn(&mut Parser, &str) -> Result<()>;

/// Handler for a directive name, case-insensitive.
pub fn lookup(name: &str) -> Option<DirectiveHandler> {
    DIRECTIVES.get(name.to_ascii_lowercase().as_str()).copied()
}

static DIRECTIVES: phf::Map<&'static str, DirectiveHandler> = phf_map! {
    "secrule" => sec_rule as DirectiveHandler,
    "secaction" => sec_action as DirectiveHandler,
    "secmarker" => sec_marker as DirectiveHandler,
    "secdefaultaction" => sec_default_action as DirectiveHandler,
    "secruleengine" => sec_rule_engine as DirectiveHandler,
    "secrequestbodyaccess" => sec_request_body_access as DirectiveHandler,
    "secresponsebodyaccess" => sec_response_body_access as DirectiveHandler,
    "secrequestbodylimit" => sec_request_body_limit as DirectiveHandler,
    "secresponsebodylimit" => sec_response_body_limit as DirectiveHandler,
    "secrequestbodylimitaction" => sec_request_body_limit_action as DirectiveHandler,
    "secresponsebodylimitaction" => sec_response_body_limit_action as DirectiveHandler,
    "secrequestbodyinmemorylimit" => sec_request_body_in_memory_limit as DirectiveHandler,
    "secrequestbodynofileslimit" => sec_request_body_no_files_limit as DirectiveHandler,
    "secrequestbodyjsondepthlimit" => sec_request_body_json_depth_limit as DirectiveHandler,
    "secresponsebodymimetype" => sec_response_body_mime_type as DirectiveHandler,
    "secresponsebodymimetypesclear" => sec_response_body_mime_types_clear as DirectiveHandler,
    "secauditengine" => sec_audit_engine as DirectiveHandler,
    "secauditlog" => sec_audit_log as DirectiveHandler,
    "secauditlogtype" => sec_audit_log_type as DirectiveHandler,
    "secauditlogformat" => sec_audit_log_format as DirectiveHandler,
    "secauditlogdir" => sec_audit_log_dir as DirectiveHandler,
    "secauditlogdirmode" => sec_audit_log_dir_mode as DirectiveHandler,
    "secauditlogfilemode" => sec_audit_log_file_mode as DirectiveHandler,
    "secauditlogrelevantstatus" => sec_audit_log_relevant_status as DirectiveHandler,
    "secauditlogparts" => sec_audit_log_parts as DirectiveHandler,
    "seccomponentsignature" => sec_component_signature as DirectiveHandler,
    "secserversignature" => sec_server_signature as DirectiveHandler,
    "sectmpdir" => sec_tmp_dir as DirectiveHandler,
    "secdatadir" => sec_data_dir as DirectiveHandler,
    "secuploaddir" => sec_upload_dir as DirectiveHandler,
    "secuploadkeepfiles" => sec_upload_keep_files as DirectiveHandler,
    "secuploadfilemode" => sec_upload_file_mode as DirectiveHandler,
    "secuploadfilelimit" => sec_upload_file_limit as DirectiveHandler,
    "secruleremovebyid" => sec_rule_remove_by_id as DirectiveHandler,
    "secruleremovebytag" => sec_rule_remove_by_tag as DirectiveHandler,
    "secruleremovebymsg" => sec_rule_remove_by_msg as DirectiveHandler,
    "secruleupdatetargetbyid" => sec_rule_update_target_by_id as DirectiveHandler,
    "secruleupdatetargetbytag" => sec_rule_update_target_by_tag as DirectiveHandler,
    "secruleupdatetargetbymsg" => sec_rule_update_target_by_msg as DirectiveHandler,
    "secruleupdateactionbyid" => sec_rule_update_action_by_id as DirectiveHandler,
    "secdataset" => sec_dataset as DirectiveHandler,
    "secignorerulecompilationerrors" => sec_ignore_rule_compilation_errors as DirectiveHandler,
    "secdebuglog" => sec_debug_log as DirectiveHandler,
    "secdebugloglevel" => sec_debug_log_level as DirectiveHandler,
    "secargumentslimit" => sec_arguments_limit as DirectiveHandler,
    "secremoterulesfailaction" => sec_remote_rules_fail_action as DirectiveHandler,
    "secwebappid" => sec_web_app_id as DirectiveHandler,
    "secsensorid" => sec_sensor_id as DirectiveHandler,
    "seccollectiontimeout" => sec_collection_timeout as DirectiveHandler,
};

fn required(p: &Parser, directive: &str, opts: &str) -> Result<String> {
    let value = unquote(opts);
    if value.trim().is_empty() {
        return Err(Error::parse(
            format!("{directive} requires an argument"),
            p.location().to_string(),
        ));
    }
    Ok(value.trim().to_string())
}

fn field(p: &Parser, rest: &mut &str, directive: &str, what: &str) -> Result<Option<String>> {
    next_field(rest).map_err(|e| Error::parse(format!("{directive} {what}: {e}"), p.location().to_string()))
}

fn required_field(p: &Parser, rest: &mut &str, directive: &str, what: &str) -> Result<String> {
    field(p, rest, directive, what)?.ok_or_else(|| {
        Error::parse(format!("{directive}: missing {what}"), p.location().to_string())
    })
}

fn sec_rule(p: &mut Parser, opts: &str) -> Result<()> {
    let mut rest = opts;
    let variables = required_field(p, &mut rest, "SecRule", "variables")?;
    let operator = required_field(p, &mut rest, "SecRule", "operator")?;
    let actions = field(p, &mut rest, "SecRule", "actions")?.unwrap_or_default();
    end_of_fields(p, "SecRule", rest)?;
    p.add_rule(Some(&variables), Some(&operator), &actions, &format!("SecRule {opts}"))
}

fn sec_action(p: &mut Parser, opts: &str) -> Result<()> {
    let actions = if opts.starts_with('"') {
        let mut rest = opts;
        let actions = field(p, &mut rest, "SecAction", "actions")?.unwrap_or_default();
        end_of_fields(p, "SecAction", rest)?;
        actions
    } else {
        opts.to_string()
    };
    p.add_rule(None, None, &actions, &format!("SecAction {opts}"))
}

/// Reject text after the last field. The tolerant parser drops a lone
/// dangling `"`.
fn end_of_fields(p: &Parser, directive: &str, rest: &str) -> Result<()> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(());
    }
    if rest == "\"" && p.mode == ParserMode::Tolerant {
        warn!(directive, line = p.current_line, "ignoring dangling quote");
        return Ok(());
    }
    Err(Error::parse(
        format!("{directive}: unexpected trailing text '{rest}'"),
        p.location().to_string(),
    ))
}

fn sec_marker(p: &mut Parser, opts: &str) -> Result<()> {
    let label = required(p, "SecMarker", opts)?;
    p.add_marker(&label)
}

fn sec_default_action(p: &mut Parser, opts: &str) -> Result<()> {
    let actions = parse_actions(&required(p, "SecDefaultAction", opts)?)?;
    let phase = validate_default_actions(&actions)?;
    debug!(phase, "default actions set");
    p.default_actions.insert(phase, actions);
    Ok(())
}

fn sec_rule_engine(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.rule_engine = RuleEngineMode::parse(&required(p, "SecRuleEngine", opts)?)?;
    Ok(())
}

fn sec_request_body_access(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.request_body_access = parse_on_off("SecRequestBodyAccess", &unquote(opts))?;
    Ok(())
}

fn sec_response_body_access(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.response_body_access = parse_on_off("SecResponseBodyAccess", &unquote(opts))?;
    Ok(())
}

fn sec_request_body_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.request_body_limit = parse_size("SecRequestBodyLimit", &unquote(opts))?;
    Ok(())
}

fn sec_response_body_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.response_body_limit = parse_size("SecResponseBodyLimit", &unquote(opts))?;
    Ok(())
}

fn sec_request_body_limit_action(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.request_body_limit_action =
        BodyLimitAction::parse(&required(p, "SecRequestBodyLimitAction", opts)?)?;
    Ok(())
}

fn sec_response_body_limit_action(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.response_body_limit_action =
        BodyLimitAction::parse(&required(p, "SecResponseBodyLimitAction", opts)?)?;
    Ok(())
}

fn sec_request_body_in_memory_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.request_body_in_memory_limit =
        parse_size("SecRequestBodyInMemoryLimit", &unquote(opts))?;
    Ok(())
}

fn sec_request_body_no_files_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.request_body_no_files_limit = parse_size("SecRequestBodyNoFilesLimit", &unquote(opts))?;
    Ok(())
}

fn sec_request_body_json_depth_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.request_body_json_depth_limit =
        parse_size("SecRequestBodyJsonDepthLimit", &unquote(opts))?;
    Ok(())
}

fn sec_response_body_mime_type(p: &mut Parser, opts: &str) -> Result<()> {
    for mime in required(p, "SecResponseBodyMimeType", opts)?.split_whitespace() {
        let mime = mime.to_ascii_lowercase();
        if !p.config.response_body_mime_types.contains(&mime) {
            p.config.response_body_mime_types.push(mime);
        }
    }
    Ok(())
}

fn sec_response_body_mime_types_clear(p: &mut Parser, _opts: &str) -> Result<()> {
    p.config.response_body_mime_types.clear();
    Ok(())
}

fn sec_audit_engine(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.engine = AuditEngineMode::parse(&required(p, "SecAuditEngine", opts)?)?;
    Ok(())
}

fn sec_audit_log(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.path = Some(PathBuf::from(required(p, "SecAuditLog", opts)?));
    Ok(())
}

fn sec_audit_log_type(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.log_type = AuditLogType::parse(&required(p, "SecAuditLogType", opts)?)?;
    Ok(())
}

fn sec_audit_log_format(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.format = AuditLogFormat::parse(&required(p, "SecAuditLogFormat", opts)?)?;
    Ok(())
}

fn sec_audit_log_dir(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.dir = Some(PathBuf::from(required(p, "SecAuditLogDir", opts)?));
    Ok(())
}

fn sec_audit_log_dir_mode(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.dir_mode = parse_octal("SecAuditLogDirMode", &unquote(opts))?;
    Ok(())
}

fn sec_audit_log_file_mode(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.file_mode = parse_octal("SecAuditLogFileMode", &unquote(opts))?;
    Ok(())
}

fn sec_audit_log_relevant_status(p: &mut Parser, opts: &str) -> Result<()> {
    let pattern = required(p, "SecAuditLogRelevantStatus", opts)?;
    p.config.audit_log.relevant_status = Some(compile_regex(&pattern)?);
    Ok(())
}

fn sec_audit_log_parts(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.audit_log.parts = AuditLogParts::parse(&required(p, "SecAuditLogParts", opts)?)?;
    Ok(())
}

fn sec_component_signature(p: &mut Parser, opts: &str) -> Result<()> {
    let signature = required(p, "SecComponentSignature", opts)?;
    p.config.component_signatures.push(signature);
    Ok(())
}

fn sec_server_signature(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.server_signature = Some(required(p, "SecServerSignature", opts)?);
    Ok(())
}

fn sec_tmp_dir(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.tmp_dir = Some(PathBuf::from(required(p, "SecTmpDir", opts)?));
    Ok(())
}

fn sec_data_dir(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.data_dir = Some(PathBuf::from(required(p, "SecDataDir", opts)?));
    Ok(())
}

fn sec_upload_dir(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.upload_dir = Some(PathBuf::from(required(p, "SecUploadDir", opts)?));
    Ok(())
}

fn sec_upload_keep_files(p: &mut Parser, opts: &str) -> Result<()> {
    let value = unquote(opts);
    p.config.upload_keep_files = if value.trim().eq_ignore_ascii_case("relevantonly") {
        true
    } else {
        parse_on_off("SecUploadKeepFiles", &value)?
    };
    Ok(())
}

fn sec_upload_file_mode(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.upload_file_mode = parse_octal("SecUploadFileMode", &unquote(opts))?;
    Ok(())
}

fn sec_upload_file_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.upload_file_limit = parse_size("SecUploadFileLimit", &unquote(opts))?;
    Ok(())
}

fn sec_rule_remove_by_id(p: &mut Parser, opts: &str) -> Result<()> {
    let ranges = IdRange::parse_list(&unquote(opts))?;
    let removed = p.rules.delete(&RuleFilter::Ids(ranges));
    debug!(removed, "SecRuleRemoveById");
    Ok(())
}

fn sec_rule_remove_by_tag(p: &mut Parser, opts: &str) -> Result<()> {
    let filter = RuleFilter::Tag(required(p, "SecRuleRemoveByTag", opts)?);
    let removed = p.rules.delete(&filter);
    debug!(removed, "SecRuleRemoveByTag");
    Ok(())
}

fn sec_rule_remove_by_msg(p: &mut Parser, opts: &str) -> Result<()> {
    let filter = RuleFilter::Msg(required(p, "SecRuleRemoveByMsg", opts)?);
    let removed = p.rules.delete(&filter);
    debug!(removed, "SecRuleRemoveByMsg");
    Ok(())
}

/// Append `variables` to every rule selected by `filter`; returns how many.
fn update_targets(p: &mut Parser, filter: &RuleFilter, opts: &mut &str, directive: &str) -> Result<usize> {
    let variables = required_field(p, opts, directive, "variables")?;
    if let Some(replacement) = field(p, opts, directive, "replacement")? {
        warn!(directive, replacement = %replacement, "target replacement is not supported, appending");
    }
    // Reject a malformed list before any rule is touched.
    apply_variables(&mut Rule::new(), &variables)?;
    let mut updated = 0;
    for rule in p.rules.find_matching_mut(filter) {
        apply_variables(rule, &variables)?;
        updated += 1;
    }
    Ok(updated)
}

fn sec_rule_update_target_by_id(p: &mut Parser, opts: &str) -> Result<()> {
    let mut rest = opts;
    let ids = required_field(p, &mut rest, "SecRuleUpdateTargetById", "rule id")?;
    let ranges = IdRange::parse_list(&ids)?;
    let first = ranges.first().map_or(0, |r| r.start);
    let updated = update_targets(p, &RuleFilter::Ids(ranges), &mut rest, "SecRuleUpdateTargetById")?;
    if updated == 0 {
        return Err(Error::RuleNotFound { id: first });
    }
    Ok(())
}

fn sec_rule_update_target_by_tag(p: &mut Parser, opts: &str) -> Result<()> {
    let mut rest = opts;
    let tag = required_field(p, &mut rest, "SecRuleUpdateTargetByTag", "tag")?;
    update_targets(p, &RuleFilter::Tag(tag), &mut rest, "SecRuleUpdateTargetByTag")?;
    Ok(())
}

fn sec_rule_update_target_by_msg(p: &mut Parser, opts: &str) -> Result<()> {
    let mut rest = opts;
    let msg = required_field(p, &mut rest, "SecRuleUpdateTargetByMsg", "message")?;
    update_targets(p, &RuleFilter::Msg(msg), &mut rest, "SecRuleUpdateTargetByMsg")?;
    Ok(())
}

fn sec_rule_update_action_by_id(p: &mut Parser, opts: &str) -> Result<()> {
    let mut rest = opts;
    let id_text = required_field(p, &mut rest, "SecRuleUpdateActionById", "rule id")?;
    let id: i32 = id_text.parse().map_err(|_| {
        Error::parse(
            format!("SecRuleUpdateActionById: invalid rule id {id_text}"),
            p.location().to_string(),
        )
    })?;
    let actions = parse_actions(&required_field(p, &mut rest, "SecRuleUpdateActionById", "actions")?)?;
    let phase = p.rules.find_by_id(id).ok_or(Error::RuleNotFound { id })?.phase;
    let defaults = p.defaults_for(phase)?;
    let rule = p.rules.find_by_id_mut(id).ok_or(Error::RuleNotFound { id })?;

    for mut action in actions {
        let fixed = matches!(
            action,
            Action::Metadata(MetadataAction::Id(_))
                | Action::Metadata(MetadataAction::Phase(_))
                | Action::Flow(FlowAction::Chain)
        );
        if fixed {
            return Err(Error::action(
                action.name(),
                "cannot be changed by SecRuleUpdateActionById",
            ));
        }
        if matches!(action, Action::Metadata(_)) {
            action.init(rule)?;
            continue;
        }
        if action.is_block() {
            action = resolve_block(rule, &defaults, action)?;
        }
        if action.is_disruptive() {
            rule.actions.retain(|existing| !existing.is_disruptive());
        }
        rule.add_action(action)?;
    }
    Ok(())
}

/// `block` takes the disruptive action (and status, unless the rule has
/// one) of the rule's phase defaults.
fn resolve_block(rule: &mut Rule, defaults: &[Action], block: Action) -> Result<Action> {
    let Some(inherited) = defaults.iter().rev().find(|a| a.is_disruptive()) else {
        return Ok(block);
    };
    if rule.disruptive_status.is_none() {
        let status = defaults
            .iter()
            .rev()
            .find(|a| matches!(a, Action::Data(DataAction::Status(_))));
        if let Some(status) = status {
            rule.add_action(status.clone())?;
        }
    }
    debug!(rule_id = rule.id, action = inherited.name(), "block resolved from default actions");
    Ok(inherited.clone())
}

fn sec_dataset(p: &mut Parser, opts: &str) -> Result<()> {
    let location = p.location().to_string();
    let (name, body) = match opts.find(char::is_whitespace) {
        Some(i) => (&opts[..i], opts[i..].trim()),
        None => (opts, ""),
    };
    let lines = body
        .strip_prefix('`')
        .and_then(|b| b.strip_suffix('`'))
        .ok_or_else(|| Error::parse(format!("SecDataset {name}: expected a backtick block"), location))?;
    let values: Vec<String> = lines
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    debug!(dataset = name, entries = values.len(), "dataset loaded");
    p.datasets.insert(name.to_string(), values);
    Ok(())
}

fn sec_ignore_rule_compilation_errors(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.ignore_rule_compilation_errors =
        parse_on_off("SecIgnoreRuleCompilationErrors", &unquote(opts))?;
    Ok(())
}

fn sec_debug_log(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.debug_log_path = Some(PathBuf::from(required(p, "SecDebugLog", opts)?));
    Ok(())
}

fn sec_debug_log_level(p: &mut Parser, opts: &str) -> Result<()> {
    let level = required(p, "SecDebugLogLevel", opts)?;
    p.config.debug_log_level = match level.parse::<u8>() {
        Ok(n) if n <= 9 => n,
        _ => return Err(Error::config(format!("SecDebugLogLevel: expected 0-9, got {level}"))),
    };
    Ok(())
}

fn sec_arguments_limit(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.arguments_limit = parse_size("SecArgumentsLimit", &unquote(opts))?;
    Ok(())
}

fn sec_remote_rules_fail_action(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.remote_rules_fail_action =
        RemoteRulesFailAction::parse(&required(p, "SecRemoteRulesFailAction", opts)?)?;
    Ok(())
}

fn sec_web_app_id(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.web_app_id = required(p, "SecWebAppId", opts)?;
    Ok(())
}

fn sec_sensor_id(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.sensor_id = required(p, "SecSensorId", opts)?;
    Ok(())
}

fn sec_collection_timeout(p: &mut Parser, opts: &str) -> Result<()> {
    p.config.collection_timeout = parse_size("SecCollectionTimeout", &unquote(opts))? as u64;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::DisruptiveAction;
    use crate::audit::AuditLogPart;
    use crate::variables::Variable;

    fn parser(input: &str) -> Parser {
        let mut p = Parser::new();
        p.parse(input).unwrap();
        p
    }

    #[test]
    fn test_lookup() {
        assert!(lookup("SecRule").is_some());
        assert!(lookup("SECAUDITLOGPARTS").is_some());
        assert!(lookup("Include").is_none());
        assert!(lookup("SecNope").is_none());
    }

    #[test]
    fn test_body_settings() {
        let p = parser(
            "SecRequestBodyAccess On\n\
             SecRequestBodyLimit 1000\n\
             SecRequestBodyLimitAction ProcessPartial\n\
             SecRequestBodyInMemoryLimit 10\n\
             SecResponseBodyAccess On\n\
             SecResponseBodyLimit 2000\n\
             SecResponseBodyMimeTypesClear\n\
             SecResponseBodyMimeType application/json Text/XML\n\
             SecArgumentsLimit 50\n\
             SecRequestBodyJsonDepthLimit 3",
        );
        let c = p.config();
        assert!(c.request_body_access);
        assert_eq!(c.request_body_limit, 1000);
        assert_eq!(c.request_body_limit_action, BodyLimitAction::ProcessPartial);
        assert_eq!(c.request_body_in_memory_limit, 10);
        assert!(c.response_body_access);
        assert_eq!(c.response_body_limit, 2000);
        assert_eq!(c.response_body_mime_types, vec!["application/json", "text/xml"]);
        assert_eq!(c.arguments_limit, 50);
        assert_eq!(c.request_body_json_depth_limit, 3);
    }

    #[test]
    fn test_audit_settings() {
        let p = parser(
            "SecAuditEngine RelevantOnly\n\
             SecAuditLog /var/log/audit.log\n\
             SecAuditLogType Concurrent\n\
             SecAuditLogFormat JSON\n\
             SecAuditLogDir /var/log/audit\n\
             SecAuditLogDirMode 0750\n\
             SecAuditLogFileMode 0640\n\
             SecAuditLogRelevantStatus \"^(?:5|4[0-9][0-9])\"\n\
             SecAuditLogParts ABZ",
        );
        let a = &p.config().audit_log;
        assert_eq!(a.engine, AuditEngineMode::RelevantOnly);
        assert_eq!(a.log_type, AuditLogType::Concurrent);
        assert_eq!(a.format, AuditLogFormat::Json);
        assert_eq!(a.dir_mode, 0o750);
        assert_eq!(a.file_mode, 0o640);
        assert!(a.relevant_status.is_some());
        assert!(a.parts.contains(AuditLogPart::RequestHeaders));
        assert!(!a.parts.contains(AuditLogPart::ResponseHeaders));
    }

    #[test]
    fn test_misc_settings() {
        let p = parser(
            "SecComponentSignature \"core ruleset/4.0\"\n\
             SecWebAppId shop\n\
             SecSensorId sensor-1\n\
             SecDebugLogLevel 3\n\
             SecUploadKeepFiles On\n\
             SecUploadFileMode 0644\n\
             SecUploadFileLimit 5\n\
             SecCollectionTimeout 600\n\
             SecTmpDir /tmp/waf",
        );
        let c = p.config();
        assert_eq!(c.component_signatures, vec!["core ruleset/4.0"]);
        assert_eq!(c.web_app_id, "shop");
        assert_eq!(c.sensor_id, "sensor-1");
        assert_eq!(c.debug_log_level, 3);
        assert!(c.upload_keep_files);
        assert_eq!(c.upload_file_mode, 0o644);
        assert_eq!(c.upload_file_limit, 5);
        assert_eq!(c.collection_timeout, 600);
        assert_eq!(c.tmp_dir, Some(PathBuf::from("/tmp/waf")));
    }

    #[test]
    fn test_bad_values() {
        let mut p = Parser::new();
        assert!(p.parse("SecRuleEngine Maybe").is_err());
        assert!(p.parse("SecRequestBodyLimit lots").is_err());
        assert!(p.parse("SecDebugLogLevel 12").is_err());
        assert!(p.parse("SecAuditLogParts ABQ").is_err());
        assert!(p.parse("SecAuditLogDirMode 999").is_err());
    }

    #[test]
    fn test_remove_rules() {
        let p = parser(
            r#"
            SecAction "id:1,pass,tag:a"
            SecAction "id:2,pass,tag:b,msg:'two'"
            SecAction "id:3,pass,tag:c"
            SecAction "id:4,pass,tag:c"
            SecAction "id:5,pass"
            SecRuleRemoveById 1 5
            SecRuleRemoveByMsg two
            SecRuleRemoveByTag C
            "#,
        );
        assert!(p.rules().is_empty());
    }

    #[test]
    fn test_remove_by_id_range() {
        let p = parser("SecAction \"id:10,pass\"\nSecAction \"id:20,pass\"\nSecAction \"id:30,pass\"\nSecRuleRemoveById 15-30");
        let ids: Vec<i32> = p.rules().rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10]);
    }

    #[test]
    fn test_update_target_by_id() {
        let p = parser(
            r#"
            SecRule ARGS "@rx x" "id:1,pass"
            SecRuleUpdateTargetById 1 "!ARGS:foo|REQUEST_HEADERS:User-Agent"
            "#,
        );
        let rule = p.rules().find_by_id(1).unwrap();
        assert_eq!(rule.variables.len(), 2);
        assert_eq!(rule.variables[0].exceptions.len(), 1);
        assert_eq!(rule.variables[1].variable, Variable::RequestHeaders);

        let mut p = Parser::new();
        assert!(p.parse("SecRuleUpdateTargetById 99 \"ARGS\"").is_err());
    }

    #[test]
    fn test_update_target_by_tag() {
        let p = parser(
            r#"
            SecRule ARGS "@rx x" "id:1,pass,tag:sqli"
            SecRule ARGS "@rx x" "id:2,pass,tag:xss"
            SecRuleUpdateTargetByTag sqli "!ARGS:q"
            "#,
        );
        assert_eq!(p.rules().find_by_id(1).unwrap().variables[0].exceptions.len(), 1);
        assert!(p.rules().find_by_id(2).unwrap().variables[0].exceptions.is_empty());
    }

    #[test]
    fn test_update_target_by_tag_across_variables() {
        let p = parser(
            r#"
            SecRule ARGS "@rx x" "id:1,pass,tag:'attack-sqli'"
            SecRule REQUEST_HEADERS:User-Agent "@rx x" "id:2,pass,tag:'attack-sqli'"
            SecRuleUpdateTargetByTag "attack-sqli" "!ARGS:foo"
            "#,
        );
        assert_eq!(p.rules().find_by_id(1).unwrap().variables[0].exceptions.len(), 1);
        let other = p.rules().find_by_id(2).unwrap();
        assert_eq!(other.variables.len(), 1);
        assert!(other.variables[0].exceptions.is_empty());
    }

    #[test]
    fn test_update_target_rejects_bad_list_before_changing_rules() {
        let mut p = Parser::new();
        p.parse(
            r#"
            SecRuleEngine On
            SecIgnoreRuleCompilationErrors On
            SecRule ARGS "@rx x" "id:1,pass,tag:t"
            SecRule ARGS "@rx x" "id:2,pass,tag:t"
            SecRuleUpdateTargetByTag t "REQUEST_HEADERS|NOT_A_VAR"
            "#,
        )
        .unwrap();
        for id in [1, 2] {
            assert_eq!(p.rules().find_by_id(id).unwrap().variables.len(), 1);
        }
    }

    #[test]
    fn test_update_action_by_id() {
        let p = parser(
            r#"
            SecRule ARGS "@rx x" "id:1,phase:1,deny,status:403,msg:'old'"
            SecRuleUpdateActionById 1 "pass,msg:'new',t:lowercase"
            "#,
        );
        let rule = p.rules().find_by_id(1).unwrap();
        assert!(matches!(rule.disruptive_action(), Some(DisruptiveAction::Pass)));
        assert_eq!(rule.actions.iter().filter(|a| a.is_disruptive()).count(), 1);
        assert_eq!(rule.msg_text(), "new");
        assert_eq!(rule.transformations.len(), 1);

        let mut p = Parser::new();
        p.parse("SecAction \"id:1,pass\"").unwrap();
        assert!(p.parse("SecRuleUpdateActionById 1 \"id:2\"").is_err());
        assert!(p.parse("SecRuleUpdateActionById 7 \"pass\"").is_err());
    }

    #[test]
    fn test_update_action_block_uses_phase_default() {
        let p = parser(
            r#"
            SecDefaultAction "phase:1,deny,status:406,log"
            SecRule ARGS "@rx x" "id:1,phase:1,pass"
            SecRule ARGS "@rx x" "id:2,phase:3,pass"
            SecRuleUpdateActionById 1 "block"
            SecRuleUpdateActionById 2 "block"
            "#,
        );
        let rule = p.rules().find_by_id(1).unwrap();
        assert!(matches!(rule.disruptive_action(), Some(DisruptiveAction::Deny)));
        assert_eq!(rule.disruptive_status, Some(406));
        assert_eq!(rule.actions.iter().filter(|a| a.is_disruptive()).count(), 1);

        let rule = p.rules().find_by_id(2).unwrap();
        assert!(matches!(rule.disruptive_action(), Some(DisruptiveAction::Block)));
    }

    #[test]
    fn test_dataset() {
        let p = parser("SecDataset bad_words `\n  Evil\n  # comment\n  worse\n`");
        assert_eq!(p.datasets["bad_words"], vec!["Evil", "worse"]);
        let mut p = Parser::new();
        assert!(p.parse("SecDataset x nope").is_err());
    }

    #[test]
    fn test_dataset_operator() {
        let p = parser(
            "SecDataset words `\nevil\n`\n\
             SecRule ARGS \"@pmFromDataset words\" \"id:1,pass\"",
        );
        assert_eq!(p.rules().len(), 1);
    }

    #[test]
    fn test_marker() {
        let p = parser("SecMarker \"END_CHECKS\"");
        assert_eq!(p.rules().rules()[0].sec_mark.as_deref(), Some("END_CHECKS"));
        let mut p = Parser::new();
        assert!(p.parse("SecMarker").is_err());
    }
}
