use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use serde_json::{Value, json};

use xpboost_admin::credential::ServiceAccountKey;
use xpboost_admin::error::LedgerError;
use xpboost_admin::ledger::LedgerService;
use xpboost_admin::sheets::connect_with_base;
use xpboost_admin::xp_update::{add_xp, set_xp};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    query: String,
    authorization: Option<String>,
    body: String,
}

/// Local stand-in for the token endpoint and the Sheets API. Every request is
/// recorded; `Connection: close` keeps one request per socket.
struct FakeApi {
    origin: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeApi {
    fn start(route: impl Fn(&Recorded) -> (u16, String) + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind local port");
        let origin = format!("http://{}", listener.local_addr().expect("local addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let Some(req) = read_request(&stream) else {
                    continue;
                };
                let (status, body) = route(&req);
                seen.lock().expect("requests lock").push(req);
                write_response(stream, status, &body);
            }
        });
        Self { origin, requests }
    }

    fn api_base(&self) -> String {
        format!("{}/v4", self.origin)
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn token_posts(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "POST" && r.path == "/token")
            .count()
    }
}

fn read_request(stream: &TcpStream) -> Option<Recorded> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        let (name, value) = header.split_once(':')?;
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.trim().parse().ok()?,
            "authorization" => authorization = Some(value.trim().to_string()),
            _ => {}
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    Some(Recorded {
        method,
        path: percent_decode(path),
        query: percent_decode(query),
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn write_response(mut stream: TcpStream, status: u16, body: &str) {
    let head = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body.as_bytes());
    let _ = stream.flush();
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (bytes[i], hex) {
            (b'%', Some(b)) => {
                out.push(b);
                i += 3;
            }
            (b'+', _) => {
                out.push(b' ');
                i += 1;
            }
            (b, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn service_key(api: &FakeApi) -> ServiceAccountKey {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 1024).expect("generate rsa key");
    let pem = private.to_pkcs8_pem(LineEnding::LF).expect("encode pem");
    ServiceAccountKey {
        key_type: "service_account".to_string(),
        project_id: "xp-boost".to_string(),
        private_key: pem.to_string(),
        client_email: "xp-bot@xp-boost.iam.gserviceaccount.com".to_string(),
        private_key_id: Some("kid-1".to_string()),
        token_uri: Some(format!("{}/token", api.origin)),
    }
}

const LEDGER_PATH: &str = "/v4/spreadsheets/ledger-1";
const VALUES_PATH: &str = "/v4/spreadsheets/ledger-1/values/";

/// One ledger named "XP BOOST 2025" whose first sheet (by index) is
/// "XP Sheet", holding T1 Alpha 500 and T2 Beta 300.
fn ledger_route(token_lifetime: i64) -> impl Fn(&Recorded) -> (u16, String) + Send {
    move |req| {
        let ok = |v: Value| (200u16, v.to_string());
        match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/token") => ok(json!({
                "access_token": "tok-1",
                "expires_in": token_lifetime,
                "token_type": "Bearer"
            })),
            ("GET", LEDGER_PATH) => ok(json!({
                "properties": {"title": "XP BOOST 2025"},
                "sheets": [
                    {"properties": {"title": "Archive", "index": 1}},
                    {"properties": {"title": "XP Sheet", "index": 0}}
                ]
            })),
            ("GET", path) if path == format!("{VALUES_PATH}'XP Sheet'") => ok(json!({
                "range": "'XP Sheet'!A1:C3",
                "majorDimension": "ROWS",
                "values": [
                    ["Team ID", "Team Name", "Total XP"],
                    ["T1", "Alpha", 500],
                    ["T2", "Beta", 300]
                ]
            })),
            ("GET", path) if path == format!("{VALUES_PATH}'XP Sheet'!A2") => {
                ok(json!({"values": [["T1"]]}))
            }
            ("GET", path) if path == format!("{VALUES_PATH}'XP Sheet'!A3") => {
                ok(json!({"values": [["T2"]]}))
            }
            ("PUT", path) if path.starts_with(VALUES_PATH) => ok(json!({"updatedCells": 1})),
            ("GET", "/v4/spreadsheets/missing") => (
                404,
                json!({"error": {"code": 404, "message": "Requested entity was not found."}})
                    .to_string(),
            ),
            ("GET", "/v4/spreadsheets/private") => (
                403,
                json!({"error": {"code": 403, "message": "The caller does not have permission"}})
                    .to_string(),
            ),
            _ => (500, json!({"error": {"message": "unexpected request"}}).to_string()),
        }
    }
}

fn puts(api: &FakeApi) -> Vec<Recorded> {
    api.requests()
        .into_iter()
        .filter(|r| r.method == "PUT")
        .collect()
}

#[test]
fn add_writes_one_raw_cell_at_the_quoted_a1_range() {
    let api = FakeApi::start(ledger_route(3600));
    let conn = connect_with_base(&service_key(&api), &api.api_base()).expect("connect");

    let snapshot = conn.read_all("ledger-1").expect("read ledger");
    assert_eq!(snapshot.title, "XP BOOST 2025");
    assert_eq!(snapshot.sheet_title, "XP Sheet");
    assert_eq!(snapshot.len(), 2);

    let change = add_xp(&conn, &snapshot, "T2", 50).expect("add");
    assert_eq!((change.row, change.old_xp, change.new_xp), (3, 300, 350));

    let writes = puts(&api);
    assert_eq!(writes.len(), 1);
    let put = &writes[0];
    assert_eq!(put.path, format!("{VALUES_PATH}'XP Sheet'!C3"));
    assert!(put.query.contains("valueInputOption=RAW"), "{}", put.query);
    assert_eq!(put.authorization.as_deref(), Some("Bearer tok-1"));
    let body: Value = serde_json::from_str(&put.body).expect("put body json");
    assert_eq!(
        body,
        json!({"range": "'XP Sheet'!C3", "majorDimension": "ROWS", "values": [[350]]})
    );

    let guard_read = api
        .requests()
        .iter()
        .any(|r| r.method == "GET" && r.path == format!("{VALUES_PATH}'XP Sheet'!A3"));
    assert!(guard_read, "team id cell is re-read before writing");
}

#[test]
fn set_targets_the_first_data_row_and_reads_unformatted_values() {
    let api = FakeApi::start(ledger_route(3600));
    let conn = connect_with_base(&service_key(&api), &api.api_base()).expect("connect");
    let snapshot = conn.read_all("ledger-1").expect("read ledger");

    let change = set_xp(&conn, &snapshot, "T1", 1200).expect("set");
    assert_eq!((change.row, change.old_xp, change.new_xp), (2, 500, 1200));

    let writes = puts(&api);
    assert_eq!(writes[0].path, format!("{VALUES_PATH}'XP Sheet'!C2"));

    let grid_read = api
        .requests()
        .into_iter()
        .find(|r| r.path == format!("{VALUES_PATH}'XP Sheet'"))
        .expect("grid was read");
    assert!(grid_read.query.contains("valueRenderOption=UNFORMATTED_VALUE"));
}

#[test]
fn missing_or_unshared_ledgers_are_not_found() {
    let api = FakeApi::start(ledger_route(3600));
    let conn = connect_with_base(&service_key(&api), &api.api_base()).expect("connect");

    for id in ["missing", "private"] {
        match conn.read_all(id) {
            Err(LedgerError::NotFound { ledger_id }) => assert_eq!(ledger_id, id),
            other => panic!("expected NotFound for {id}, got {other:?}"),
        }
    }
    assert!(puts(&api).is_empty());
}

#[test]
fn token_is_reused_until_close_to_expiry() {
    let api = FakeApi::start(ledger_route(3600));
    let conn = connect_with_base(&service_key(&api), &api.api_base()).expect("connect");
    conn.read_all("ledger-1").expect("read ledger");
    assert_eq!(api.token_posts(), 1);

    // Lifetimes inside the refresh margin force a new token per call.
    let api = FakeApi::start(ledger_route(30));
    let conn = connect_with_base(&service_key(&api), &api.api_base()).expect("connect");
    conn.read_all("ledger-1").expect("read ledger");
    assert_eq!(api.token_posts(), 3);

    let token_form = api
        .requests()
        .into_iter()
        .find(|r| r.path == "/token")
        .expect("token request");
    assert!(
        token_form
            .body
            .contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer")
    );
}

#[test]
fn rejected_credential_is_an_auth_error() {
    let api = FakeApi::start(|req| match req.path.as_str() {
        "/token" => (
            400,
            json!({"error": "invalid_grant", "error_description": "Invalid JWT Signature."})
                .to_string(),
        ),
        _ => (500, String::new()),
    });
    let err = connect_with_base(&service_key(&api), &api.api_base()).unwrap_err();
    assert!(matches!(err, LedgerError::Auth(_)), "{err:?}");
}
