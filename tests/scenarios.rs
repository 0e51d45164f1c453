//! End-to-end transactions against the public API.

use std::sync::Arc;
use zentinel_seclang::audit::MemoryWriter;
use zentinel_seclang::{InterruptionAction, MemoryFilesystem, Variable, Waf};

fn ids(tx: &zentinel_seclang::Transaction) -> Vec<i32> {
    tx.matched_rules().iter().map(|m| m.rule_id).collect()
}

#[test]
fn deny_by_remote_address() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecDefaultAction "phase:1,deny,status:403,log"
        SecRule REMOTE_ADDR "^127.*" "id:1,phase:1"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_connection("127.0.0.1", 0, "", 0);
    let it = tx.process_request_headers().unwrap();
    assert_eq!(it.status, 403);
    assert_eq!(it.rule_id, 1);
    assert_eq!(ids(&tx), vec![1]);
}

#[test]
fn skip_after_marker() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecAction "phase:1,id:1,log,skipAfter:M"
        SecAction "phase:1,id:2,deny,status:403"
        SecMarker M
        SecAction "phase:2,id:3,deny,status:403,log"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    assert!(tx.process_request_headers().is_none());
    let it = tx.process_request_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 3);
    assert_eq!(it.status, 403);
    assert_eq!(ids(&tx), vec![1, 3]);
}

#[test]
fn chain_requires_every_link() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRule ARGS "123" "id:1,phase:1,log,chain"
            SecRule &ARGS "@gt 0" "chain"
            SecRule ARGS "456" "setvar:tx.test=ok"
        SecRule ARGS "123" "id:2,phase:1,log,chain"
            SecRule &ARGS "@gt 100" "chain"
            SecRule ARGS "456" "setvar:tx.test2=ok"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/?test1=123&test2=456", "GET", "HTTP/1.1");
    assert!(tx.process_request_headers().is_none());
    assert_eq!(ids(&tx), vec![1]);
    assert_eq!(tx.variables().first(Variable::Tx, "test"), Some("ok"));
    assert_eq!(tx.variables().first(Variable::Tx, "test2"), None);
}

#[test]
fn json_body_overrides_query_arguments() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRequestBodyAccess On
        SecRule REQUEST_HEADERS:Content-Type "^application/json" "id:900,phase:1,pass,nolog,ctl:requestBodyProcessor=JSON"
        SecRule ARGS "@contains evil" "id:901,phase:2,deny,status:403"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/q?foo=bar", "POST", "HTTP/1.1");
    tx.add_request_header("Content-Type", "application/json");
    assert!(tx.process_request_headers().is_none());
    tx.write_request_body(br#"{"foo":"evil"}"#).unwrap();
    let it = tx.process_request_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 901);
    assert_eq!(it.status, 403);
    assert_eq!(tx.variables().first(Variable::ArgsGet, "foo"), None);
    assert_eq!(tx.variables().first(Variable::ArgsPost, "json.foo"), Some("evil"));
}

#[test]
fn body_limit_rejects() {
    let waf = Waf::from_string(
        r#"
        SecRequestBodyLimit 11
        SecRequestBodyLimitAction Reject
        SecRequestBodyAccess On
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    let (it, _) = tx.write_request_body(b"123456789012").unwrap();
    assert_eq!(it.unwrap().status, 403);
    assert_eq!(tx.variables().get(Variable::InboundDataError), "1");
    assert!(tx.is_interrupted());
}

#[test]
fn json_stream_stops_at_offending_record() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRequestBodyAccess On
        SecRule REQUEST_HEADERS:Content-Type "^application/x-ndjson" "id:900,phase:1,pass,nolog,ctl:requestBodyProcessor=JSONSTREAM"
        SecRule ARGS_POST "@contains evil" "id:100,phase:2,deny,status:403"
        SecRule ARGS_POST:json.name "@streq Bob" "id:101,phase:2,pass,log"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/ingest", "POST", "HTTP/1.1");
    tx.add_request_header("Content-Type", "application/x-ndjson");
    tx.process_request_headers();
    tx.write_request_body(b"{\"name\":\"Alice\"}\n{\"name\":\"evil payload\"}\n{\"name\":\"Bob\"}\n")
        .unwrap();
    let it = tx.process_request_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 100);
    assert_eq!(it.status, 403);
    assert_eq!(ids(&tx), vec![900, 100]);
}

#[test]
fn detection_only_records_without_interrupting() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine DetectionOnly
        SecRule REQUEST_URI "@beginsWith /admin" "id:10,phase:1,deny,status:403,log"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/admin/users", "GET", "HTTP/1.1");
    assert!(tx.process_request_headers().is_none());
    assert_eq!(ids(&tx), vec![10]);
}

#[test]
fn redirect_expands_macros() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRule REQUEST_HEADERS:Host "@streq old.example" "id:20,phase:1,redirect:'https://new.example%{REQUEST_FILENAME}'"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/docs/page", "GET", "HTTP/1.1");
    tx.add_request_header("Host", "old.example");
    let it = tx.process_request_headers().unwrap();
    assert_eq!(it.action, InterruptionAction::Redirect);
    assert_eq!(it.status, 302);
    assert_eq!(it.data, "https://new.example/docs/page");
}

#[test]
fn multipart_upload_variables() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRequestBodyAccess On
        SecRule FILES "@endsWith .php" "id:30,phase:2,deny,status:403,msg:'script upload'"
        "#,
    )
    .unwrap();
    let body = "--xyz\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
report\r\n\
--xyz\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"shell.php\"\r\n\
Content-Type: application/octet-stream\r\n\
\r\n\
<?php echo 1; ?>\r\n\
--xyz--\r\n";
    let mut tx = waf.new_transaction();
    tx.process_uri("/upload", "POST", "HTTP/1.1");
    tx.add_request_header("Content-Type", "multipart/form-data; boundary=xyz");
    tx.process_request_headers();
    tx.write_request_body(body.as_bytes()).unwrap();
    let it = tx.process_request_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 30);
    assert_eq!(tx.variables().first(Variable::ArgsPost, "title"), Some("report"));
    assert_eq!(tx.variables().first(Variable::FilesNames, "upload"), Some("upload"));
    assert_eq!(tx.variables().get(Variable::ReqbodyProcessor), "MULTIPART");
}

#[test]
fn xml_body_text_is_inspected() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRequestBodyAccess On
        SecRule REQUEST_HEADERS:Content-Type "@contains xml" "id:40,phase:1,pass,nolog,ctl:requestBodyProcessor=XML"
        SecRule XML:/* "@contains DROP TABLE" "id:41,phase:2,deny,status:403"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/soap", "POST", "HTTP/1.1");
    tx.add_request_header("Content-Type", "text/xml");
    tx.process_request_headers();
    tx.write_request_body(b"<req><q>1; DROP TABLE users</q></req>").unwrap();
    let it = tx.process_request_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 41);
}

#[test]
fn malformed_body_sets_processor_error() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRequestBodyAccess On
        SecRule REQUEST_HEADERS:Content-Type "^application/json" "id:900,phase:1,pass,nolog,ctl:requestBodyProcessor=JSON"
        SecRule REQBODY_PROCESSOR_ERROR "!@eq 0" "id:200002,phase:2,deny,status:400,msg:'Failed to parse request body'"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/api", "POST", "HTTP/1.1");
    tx.add_request_header("Content-Type", "application/json");
    tx.process_request_headers();
    tx.write_request_body(b"{\"open\": ").unwrap();
    let it = tx.process_request_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 200002);
    assert_eq!(it.status, 400);
    assert!(!tx.variables().get(Variable::ReqbodyProcessorErrorMsg).is_empty());
}

#[test]
fn response_phases_see_status_and_body() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecResponseBodyAccess On
        SecRule RESPONSE_STATUS "@eq 500" "id:50,phase:3,pass,log,setvar:tx.server_error=1"
        SecRule RESPONSE_BODY "@contains stack trace" "id:51,phase:4,deny,status:502"
        "#,
    )
    .unwrap();
    let mut tx = waf.new_transaction();
    tx.process_uri("/", "GET", "HTTP/1.1");
    tx.process_request_headers();
    tx.process_request_body().unwrap();
    tx.add_response_header("Content-Type", "text/html; charset=utf-8");
    assert!(tx.process_response_headers(500, "HTTP/1.1").is_none());
    assert!(tx.is_response_body_processable());
    tx.write_response_body(b"<pre>stack trace: ...</pre>").unwrap();
    let it = tx.process_response_body().unwrap().unwrap();
    assert_eq!(it.rule_id, 51);
    assert_eq!(tx.variables().first(Variable::Tx, "server_error"), Some("1"));
}

#[test]
fn persistent_counters_span_transactions() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecAction "id:60,phase:1,pass,nolog,initcol:ip=%{REMOTE_ADDR},setvar:ip.hits=+1"
        SecRule IP:hits "@gt 2" "id:61,phase:1,deny,status:429"
        "#,
    )
    .unwrap();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let mut tx = waf.new_transaction();
        tx.process_connection("198.51.100.9", 40000, "192.0.2.1", 443);
        statuses.push(tx.process_request_headers().map(|it| it.status));
        tx.process_logging();
    }
    assert_eq!(statuses, vec![None, None, Some(429)]);

    let mut other = waf.new_transaction();
    other.process_connection("198.51.100.10", 40000, "192.0.2.1", 443);
    assert!(other.process_request_headers().is_none());
}

#[test]
fn audit_record_for_relevant_transaction() {
    let writer = Arc::new(MemoryWriter::new());
    let waf = Waf::builder()
        .directives(
            r#"
            SecRuleEngine On
            SecAuditEngine RelevantOnly
            SecAuditLogParts ABHZ
            SecRule ARGS:id "@rx ^[0-9]+$" "id:70,phase:1,pass,nolog"
            SecRule ARGS:id "!@rx ^[0-9]+$" "id:71,phase:1,deny,status:403,log,auditlog,msg:'bad id %{MATCHED_VAR}'"
            "#,
        )
        .audit_writer(writer.clone())
        .build()
        .unwrap();

    let mut clean = waf.new_transaction();
    clean.process_uri("/item?id=42", "GET", "HTTP/1.1");
    clean.process_request_headers();
    clean.process_logging();
    assert!(writer.logs().is_empty());

    let mut attack = waf.new_transaction_with_id("tx-attack");
    attack.process_connection("203.0.113.5", 1234, "192.0.2.1", 80);
    attack.process_uri("/item?id=1%20or%201=1", "GET", "HTTP/1.1");
    attack.process_request_headers();
    attack.process_logging();

    let logs = writer.logs();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.transaction.id, "tx-attack");
    assert_eq!(log.transaction.client_ip, "203.0.113.5");
    assert_eq!(log.messages.len(), 1);
    assert_eq!(log.messages[0].data.id, 71);
    assert!(log.messages[0].message.contains("bad id 1 or 1=1"));
    assert!(log.transaction.request.is_some());
}

#[test]
fn include_resolves_relative_to_including_file() {
    let fs = MemoryFilesystem::new()
        .with_file("/etc/waf/main.conf", "SecRuleEngine On\nInclude rules/*.conf\n")
        .with_file(
            "/etc/waf/rules/10-scanner.conf",
            "SecRule REQUEST_HEADERS:User-Agent \"@pmFromFile scanners.data\" \"id:80,phase:1,deny,status:403\"\n",
        )
        .with_file("/etc/waf/rules/scanners.data", "# scanners\nnikto\nsqlmap\n");
    let waf = Waf::builder()
        .filesystem(Arc::new(fs))
        .file("/etc/waf/main.conf")
        .build()
        .unwrap();
    assert_eq!(waf.rules().len(), 1);
    assert_eq!(waf.rules().rules()[0].line, 1);

    let mut tx = waf.new_transaction();
    tx.add_request_header("User-Agent", "sqlmap/1.7");
    assert_eq!(tx.process_request_headers().unwrap().rule_id, 80);
}

#[test]
fn ctl_removes_rules_for_one_transaction() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRule REQUEST_FILENAME "@streq /health" "id:90,phase:1,pass,nolog,ctl:ruleRemoveById=91"
        SecRule REQUEST_HEADERS:User-Agent "@contains curl" "id:91,phase:1,deny,status:403"
        "#,
    )
    .unwrap();

    let mut health = waf.new_transaction();
    health.process_uri("/health", "GET", "HTTP/1.1");
    health.add_request_header("User-Agent", "curl/8.0");
    assert!(health.process_request_headers().is_none());

    let mut api = waf.new_transaction();
    api.process_uri("/api", "GET", "HTTP/1.1");
    api.add_request_header("User-Agent", "curl/8.0");
    assert_eq!(api.process_request_headers().unwrap().rule_id, 91);
}

#[test]
fn waf_is_shared_across_threads() {
    let waf = Waf::from_string(
        r#"
        SecRuleEngine On
        SecRule ARGS:n "@eq 3" "id:95,phase:1,deny,status:403"
        "#,
    )
    .unwrap();
    let handles: Vec<_> = (0..6)
        .map(|n| {
            let waf = waf.clone();
            std::thread::spawn(move || {
                let mut tx = waf.new_transaction();
                tx.process_uri(&format!("/?n={n}"), "GET", "HTTP/1.1");
                tx.process_request_headers().is_some()
            })
        })
        .collect();
    let blocked: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(blocked, vec![false, false, false, true, false, false]);
}
