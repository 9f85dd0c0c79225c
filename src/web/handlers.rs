use axum::{
    extract::{Form, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use minijinja::context;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AdminSession, Flash, FlashLevel, Session},
    model::{Device, GpsLocation, Submission},
    web::AppState,
};

const SUBMIT_FAILED: &str = "An error occurred while submitting the form.";

const SCRIPT_JS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/static/script.js"));

/// Query parameters carried by a scanned label URL.
#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    pub serial: Option<String>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub lot: Option<String>,
    /// Labels encode the build date as `build`.
    pub build: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitForm {
    pub serial: Option<String>,
    pub build_date: Option<String>,
    pub mfg_location: Option<String>,
    pub lot_number: Option<String>,
    pub technician: Option<String>,
    pub school: Option<String>,
    pub software_version: Option<String>,
    pub condition: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

/// Device identity fields; the scanned link wins over the posted form.
#[derive(Debug, Default, Serialize)]
struct ScanFields {
    serial: String,
    build_date: String,
    mfg_location: String,
    lot_number: String,
}

impl ScanFields {
    fn resolve(q: &ScanQuery, form: Option<&SubmitForm>) -> Self {
        Self {
            serial: pick([q.serial.as_deref(), form.and_then(|f| f.serial.as_deref())]),
            build_date: pick([
                q.date.as_deref(),
                q.build.as_deref(),
                form.and_then(|f| f.build_date.as_deref()),
            ]),
            mfg_location: pick([
                q.location.as_deref(),
                form.and_then(|f| f.mfg_location.as_deref()),
            ]),
            lot_number: pick([q.lot.as_deref(), form.and_then(|f| f.lot_number.as_deref())]),
        }
    }
}

fn pick<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// The field must be posted; a blank value is stored as sent (trimmed).
fn required(value: &Option<String>, field: &'static str) -> Result<String, &'static str> {
    value
        .as_deref()
        .map(|v| v.trim().to_string())
        .ok_or(field)
}

fn build_submission(
    fields: &ScanFields,
    form: &SubmitForm,
    device: Option<&Device>,
) -> Result<Submission, &'static str> {
    Ok(Submission {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        serial: fields.serial.clone(),
        username: required(&form.technician, "technician")?,
        school: required(&form.school, "school")?,
        software_version: required(&form.software_version, "software_version")?,
        condition: required(&form.condition, "condition")?,
        gps_location: GpsLocation::new(trimmed(&form.latitude), trimmed(&form.longitude)),
        build_date: fields.build_date.clone(),
        mfg_location: fields.mfg_location.clone(),
        lot_number: fields.lot_number.clone(),
        model: device.map(|d| d.model.clone()),
    })
}

#[derive(Serialize)]
struct IndexPage {
    #[serde(flatten)]
    fields: ScanFields,
    success: bool,
    flashes: Vec<Flash>,
}

fn index_page(state: &AppState, mut session: Session, fields: ScanFields, success: bool) -> Response {
    let page = state.templates.page(
        "index.html",
        IndexPage {
            fields,
            success,
            flashes: session.take_flashes(),
        },
    );
    (session.into_jar(), page).into_response()
}

// ------------------------------------------------------------
// PUBLIC
// ------------------------------------------------------------
pub async fn index(
    State(state): State<AppState>,
    session: Session,
    Query(q): Query<ScanQuery>,
) -> Response {
    let fields = ScanFields::resolve(&q, None);
    index_page(&state, session, fields, false)
}

pub async fn submit(
    State(state): State<AppState>,
    mut session: Session,
    Query(q): Query<ScanQuery>,
    Form(form): Form<SubmitForm>,
) -> Response {
    let fields = ScanFields::resolve(&q, Some(&form));
    let device = state.devices.lookup_async(&fields.serial).await;
    let mut success = false;

    match build_submission(&fields, &form, device.as_ref()) {
        Err(field) => {
            warn!(serial = %fields.serial, field, "submission missing required field");
            session.flash(FlashLevel::Error, SUBMIT_FAILED);
        }
        Ok(sub) => match state.db.insert(&sub).await {
            Ok(()) if device.is_some() => {
                info!(serial = %sub.serial, id = %sub.id, "scan saved");
                success = true;
                session.flash(FlashLevel::Success, "Form submitted successfully.");
            }
            Ok(()) => {
                warn!(serial = %sub.serial, id = %sub.id, "scan saved for serial missing from inventory");
                session.flash(
                    FlashLevel::Warning,
                    "Device not found in inventory, but scan saved to database.",
                );
            }
            Err(err) => {
                error!(serial = %sub.serial, ?err, "failed to store submission");
                session.flash(FlashLevel::Error, SUBMIT_FAILED);
            }
        },
    }

    index_page(&state, session, fields, success)
}

pub async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        SCRIPT_JS,
    )
}

// ------------------------------------------------------------
// ADMIN
// ------------------------------------------------------------
pub async fn dashboard(
    State(state): State<AppState>,
    AdminSession(mut session): AdminSession,
) -> Response {
    let mut serials = state.db.distinct_serials().await.unwrap_or_else(|err| {
        error!(?err, "failed to list serials");
        session.flash(FlashLevel::Error, "Could not load devices.");
        Vec::new()
    });
    // Scans posted without a serial have no history page to link to.
    serials.retain(|serial| !serial.is_empty());

    let page = state.templates.page(
        "dashboard.html",
        context! { serials => serials, flashes => session.take_flashes() },
    );
    (session.into_jar(), page).into_response()
}

#[derive(Serialize)]
struct DeviceRecord {
    #[serde(flatten)]
    submission: Submission,
    time: String,
    gps_address: String,
}

pub async fn device(
    State(state): State<AppState>,
    AdminSession(mut session): AdminSession,
    Path(serial): Path<String>,
) -> Response {
    let submissions = state.db.find_by_serial(&serial).await.unwrap_or_else(|err| {
        error!(%serial, ?err, "failed to load submissions");
        session.flash(FlashLevel::Error, "Could not load submissions.");
        Vec::new()
    });

    let mut records = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let gps = &submission.gps_location;
        let gps_address = state
            .geocoder
            .address_for(Some(gps.latitude.as_str()), Some(gps.longitude.as_str()))
            .await;
        records.push(DeviceRecord {
            time: submission.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            submission,
            gps_address,
        });
    }

    let page = state.templates.page(
        "device.html",
        context! { serial => serial, records => records, flashes => session.take_flashes() },
    );
    (session.into_jar(), page).into_response()
}

#[derive(Debug, Serialize)]
struct MapMarker {
    serial: String,
    model: Option<String>,
    school: String,
    latitude: f64,
    longitude: f64,
    gps_location: String,
}

pub async fn looma_map(
    State(state): State<AppState>,
    AdminSession(mut session): AdminSession,
) -> Response {
    let projected = state.db.find_all_projected().await.unwrap_or_else(|err| {
        error!(?err, "failed to load map projection");
        session.flash(FlashLevel::Error, "Could not load submissions.");
        Vec::new()
    });

    let mut devices = Vec::new();
    for rec in projected {
        let gps = GpsLocation::new(rec.latitude, rec.longitude);
        let Some((latitude, longitude)) = gps.coordinates() else {
            continue;
        };
        let address = state.geocoder.address(latitude, longitude).await;
        devices.push(MapMarker {
            serial: rec.serial,
            model: rec.model,
            school: if rec.school.is_empty() {
                "Unknown".to_string()
            } else {
                rec.school
            },
            latitude,
            longitude,
            gps_location: address,
        });
    }

    let page = state.templates.page(
        "map.html",
        context! { devices => devices, flashes => session.take_flashes() },
    );
    (session.into_jar(), page).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{session::SESSION_COOKIE, utils::hash_password},
        config::AppConfig,
        db::DBLayer,
        geocode::tests::spawn_fake_nominatim,
        web::router,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderMap, Request, StatusCode},
        Router,
    };
    use std::{path::PathBuf, sync::Arc};
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        state: AppState,
        db: Arc<DBLayer>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn harness() -> Harness {
        let dir = std::env::temp_dir().join(format!("looma-web-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let devices_csv = dir.join("devices.csv");
        std::fs::write(&devices_csv, "serial,model,build\nABC123,Looma 3,2023-11\n").unwrap();

        let config = AppConfig {
            bind_addr: "127.0.0.1:0".into(),
            db_path: dir.join("db"),
            devices_csv,
            geocoder_url: spawn_fake_nominatim().await,
            admin_username: "admin".into(),
            admin_password_hash: Some(hash_password("s3cret").unwrap()),
            session_secret: b"test-secret".to_vec(),
        };
        let state = AppState::from_config(&config).unwrap();

        Harness {
            app: router(state.clone()),
            db: state.db.clone(),
            state,
            dir,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::get(uri);
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        req.body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn session_cookie(headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .find(|kv| kv.starts_with(&format!("{SESSION_COOKIE}=")) && kv.len() > SESSION_COOKIE.len() + 1)
            .map(str::to_string)
    }

    async fn login(app: &Router) -> String {
        let (status, headers, _) = send(app, post("/login", "username=admin&password=s3cret", None)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/dashboard");
        session_cookie(&headers).expect("login sets a session cookie")
    }

    const REPORT: &str = "technician=jdoe&school=Test+School&software_version=1.0&condition=Good";

    #[tokio::test]
    async fn known_serial_is_saved_with_success_flash() {
        let h = harness().await;
        let before = Utc::now();
        let (status, _, body) = send(
            &h.app,
            post("/?serial=ABC123&date=2023-11&location=Kathmandu&lot=L7", REPORT, None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Form submitted successfully."));

        let stored = h.db.find_by_serial("ABC123").await.unwrap();
        assert_eq!(stored.len(), 1);
        let sub = &stored[0];
        assert_eq!(sub.username, "jdoe");
        assert_eq!(sub.school, "Test School");
        assert_eq!(sub.software_version, "1.0");
        assert_eq!(sub.condition, "Good");
        assert_eq!(sub.gps_location, GpsLocation::default());
        assert_eq!(sub.build_date, "2023-11");
        assert_eq!(sub.mfg_location, "Kathmandu");
        assert_eq!(sub.lot_number, "L7");
        assert_eq!(sub.model.as_deref(), Some("Looma 3"));
        assert!(sub.timestamp >= before && sub.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn unknown_serial_is_saved_with_warning() {
        let h = harness().await;
        let (_, _, body) = send(&h.app, post("/", &format!("serial=ZZZ999&{REPORT}"), None)).await;

        assert!(body.contains("Device not found in inventory, but scan saved to database."));
        let stored = h.db.find_by_serial("ZZZ999").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].model, None);
    }

    #[tokio::test]
    async fn missing_required_field_stores_nothing() {
        let h = harness().await;
        let body = "serial=ABC123&technician=jdoe&school=Test+School&software_version=1.0";
        let (status, _, page) = send(&h.app, post("/", body, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("An error occurred while submitting the form."));
        assert!(!page.contains("Form submitted successfully."));
        assert!(h.db.distinct_serials().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_required_field_is_stored_as_sent() {
        let h = harness().await;
        let body = "serial=ABC123&technician=jdoe&school=Test+School&software_version=1.0&condition=+";
        let (_, _, page) = send(&h.app, post("/", body, None)).await;

        assert!(page.contains("Form submitted successfully."));
        let stored = h.db.find_by_serial("ABC123").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].condition, "");
    }

    #[tokio::test]
    async fn store_failure_shows_generic_error() {
        let h = harness().await;
        let frozen_dir = h.dir.join("frozen");
        drop(DBLayer::new(&frozen_dir).unwrap());

        let mut state = h.state.clone();
        state.db = Arc::new(DBLayer::open_read_only(&frozen_dir).unwrap());
        let app = router(state);

        let (status, _, page) = send(&app, post("/?serial=ABC123", REPORT, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("An error occurred while submitting the form."));
        assert!(!page.contains("Form submitted successfully."));
    }

    #[tokio::test]
    async fn dashboard_links_reach_serials_with_slashes() {
        let h = harness().await;
        send(&h.app, post("/?serial=LM%2F7", REPORT, None)).await;
        send(&h.app, post("/", REPORT, None)).await;

        let cookie = login(&h.app).await;
        let (_, _, body) = send(&h.app, get("/dashboard", Some(&cookie))).await;
        assert!(body.contains(r#"href="/device/LM%2F7""#));
        assert!(!body.contains(r#"href="/device/""#));

        let (status, _, history) = send(&h.app, get("/device/LM%2F7", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.matches("<td>jdoe</td>").count(), 1);
    }

    #[tokio::test]
    async fn scan_link_prefills_form() {
        let h = harness().await;
        let (status, _, body) = send(
            &h.app,
            get("/?serial=ABC123&date=2023-11&location=Kathmandu&lot=L7", None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"value="ABC123""#));
        assert!(body.contains(r#"value="2023-11""#));
        assert!(body.contains(r#"value="Kathmandu""#));
        assert!(body.contains(r#"value="L7""#));

        let (_, _, body) = send(&h.app, get("/?serial=ABC123&build=2024-02", None)).await;
        assert!(body.contains(r#"value="2024-02""#));
    }

    #[tokio::test]
    async fn admin_pages_redirect_anonymous_users() {
        let h = harness().await;
        send(&h.app, post("/?serial=ABC123", REPORT, None)).await;

        for path in ["/dashboard", "/device/ABC123", "/looma_map"] {
            let (status, headers, body) = send(&h.app, get(path, None)).await;
            assert_eq!(status, StatusCode::SEE_OTHER, "{path}");
            assert_eq!(headers[header::LOCATION], "/login");
            assert!(!body.contains("ABC123"));

            let cookie = session_cookie(&headers).unwrap();
            let (_, _, login_page) = send(&h.app, get("/login", Some(&cookie))).await;
            assert!(login_page.contains("Please log in to access this page."));
        }
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected_generically() {
        let h = harness().await;
        for body in [
            "username=admin&password=wrong",
            "username=root&password=s3cret",
            "username=&password=",
        ] {
            let (status, headers, page) = send(&h.app, post("/login", body, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert!(page.contains("Invalid credentials."));

            let cookie = session_cookie(&headers);
            let (status, _, _) = send(&h.app, get("/dashboard", cookie.as_deref())).await;
            assert_eq!(status, StatusCode::SEE_OTHER);
        }
    }

    #[tokio::test]
    async fn login_opens_dashboard_and_logout_closes_it() {
        let h = harness().await;
        send(&h.app, post("/?serial=ABC123", REPORT, None)).await;
        send(&h.app, post("/?serial=XYZ9", REPORT, None)).await;

        let cookie = login(&h.app).await;
        let (status, _, body) = send(&h.app, get("/dashboard", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Logged in successfully."));
        assert!(body.contains(r#"href="/device/ABC123""#));
        assert!(body.contains(r#"href="/device/XYZ9""#));

        let (status, headers, _) = send(&h.app, get("/logout", Some(&cookie))).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/login");
        let after = session_cookie(&headers).unwrap();
        let (status, _, _) = send(&h.app, get("/dashboard", Some(&after))).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn device_history_resolves_each_address() {
        let h = harness().await;
        send(&h.app, post("/?serial=ABC123", &format!("{REPORT}&latitude=27.7&longitude=85.3"), None)).await;
        send(&h.app, post("/?serial=ABC123", &format!("{REPORT}&latitude=abc&longitude=85.3"), None)).await;

        let cookie = login(&h.app).await;
        let (status, _, body) = send(&h.app, get("/device/ABC123", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Kathmandu, Nepal (27.7)"));
        assert!(body.contains("<td>Unknown</td>"));
        assert_eq!(body.matches("<td>jdoe</td>").count(), 2);
    }

    #[tokio::test]
    async fn map_only_plots_valid_coordinates() {
        let h = harness().await;
        send(&h.app, post("/?serial=ABC123", &format!("{REPORT}&latitude=27.7&longitude=85.3"), None)).await;
        send(&h.app, post("/?serial=BAD1", &format!("{REPORT}&latitude=abc&longitude=85.3"), None)).await;
        send(&h.app, post("/?serial=NOGPS", REPORT, None)).await;

        let cookie = login(&h.app).await;
        let (status, _, body) = send(&h.app, get("/looma_map", Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("1 located submission(s)."));
        assert!(body.contains("Kathmandu, Nepal (27.7)"));
        assert!(body.contains("Looma 3"));
        assert!(!body.contains("BAD1"));
        assert!(!body.contains("NOGPS"));
    }

    #[tokio::test]
    async fn serves_client_script() {
        let h = harness().await;
        let (status, headers, body) = send(&h.app, get("/static/script.js", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/javascript"));
        assert!(body.contains("geolocation"));
    }
}
