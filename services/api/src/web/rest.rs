//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints, the router that
//! wires them together and the master definition for the OpenAPI
//! specification.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use engagement_core::domain::{
    parse_time_of_day, ClientProfile, ClientReminderSettings, DispatchStatus, ReminderDispatch,
    ReminderSettingsUpdate, Trigger,
};
use engagement_core::scheduler::{PassOptions, PassSummary, PassWarning, ReminderPreview};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::web::state::AppState;

const DEFAULT_DISPATCH_LIMIT: u32 = 20;
const MAX_DISPATCH_LIMIT: u32 = 100;

/// Settings keys a coach may never write.
const IMMUTABLE_SETTINGS_FIELDS: [&str; 5] = ["id", "clientId", "coachId", "createdAt", "updatedAt"];

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        get_settings_handler,
        update_settings_handler,
        trigger_reminders_handler,
        list_triggers_handler,
        preview_reminders_handler,
        send_reminder_handler,
        list_dispatches_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReminderSettingsResponse,
            UpdateReminderSettingsRequest,
            TriggerRemindersRequest,
            PassSummaryResponse,
            WarningResponse,
            TriggerResponse,
            ReminderPreviewResponse,
            SendReminderRequest,
            DispatchResponse,
        )
    ),
    tags(
        (name = "Engagement Reminders API", description = "Reminder settings, trigger detection and reminder dispatch for coaching clients.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Router
//=========================================================================================

/// Builds the API router. Shared by the `api` binary and the integration tests.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/clients/{id}/reminder-settings",
            get(get_settings_handler).patch(update_settings_handler),
        )
        .route(
            "/clients/{id}/trigger-reminders",
            post(trigger_reminders_handler),
        )
        .route("/clients/{id}/triggers", get(list_triggers_handler))
        .route(
            "/clients/{id}/reminder-previews",
            get(preview_reminders_handler),
        )
        .route("/clients/{id}/reminders/send", post(send_reminder_handler))
        .route(
            "/clients/{id}/reminder-dispatches",
            get(list_dispatches_handler),
        )
        .with_state(state)
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    storage: &'static str,
}

/// A client's reminder settings. Times are client-local `HH:MM`.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSettingsResponse {
    id: Uuid,
    client_id: Uuid,
    coach_id: Uuid,
    reminders_enabled: bool,
    goal_reminders_enabled: bool,
    plan_reminders_enabled: bool,
    inactivity_reminders_enabled: bool,
    inactivity_threshold_days: u32,
    quiet_hours_start: String,
    quiet_hours_end: String,
    max_reminders_per_day: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ClientReminderSettings> for ReminderSettingsResponse {
    fn from(s: ClientReminderSettings) -> Self {
        Self {
            id: s.id,
            client_id: s.client_id,
            coach_id: s.coach_id,
            reminders_enabled: s.reminders_enabled,
            goal_reminders_enabled: s.goal_reminders_enabled,
            plan_reminders_enabled: s.plan_reminders_enabled,
            inactivity_reminders_enabled: s.inactivity_reminders_enabled,
            inactivity_threshold_days: s.inactivity_threshold_days,
            quiet_hours_start: s.quiet_hours_start.format("%H:%M").to_string(),
            quiet_hours_end: s.quiet_hours_end.format("%H:%M").to_string(),
            max_reminders_per_day: s.max_reminders_per_day,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// A partial settings update. Absent fields keep their current value.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateReminderSettingsRequest {
    reminders_enabled: Option<bool>,
    goal_reminders_enabled: Option<bool>,
    plan_reminders_enabled: Option<bool>,
    inactivity_reminders_enabled: Option<bool>,
    #[schema(minimum = 1, maximum = 7)]
    inactivity_threshold_days: Option<u32>,
    #[schema(example = "21:00")]
    quiet_hours_start: Option<String>,
    #[schema(example = "08:00")]
    quiet_hours_end: Option<String>,
    #[schema(minimum = 1, maximum = 10)]
    max_reminders_per_day: Option<u32>,
}

impl UpdateReminderSettingsRequest {
    fn into_update(self) -> ApiResult<ReminderSettingsUpdate> {
        Ok(ReminderSettingsUpdate {
            reminders_enabled: self.reminders_enabled,
            goal_reminders_enabled: self.goal_reminders_enabled,
            plan_reminders_enabled: self.plan_reminders_enabled,
            inactivity_reminders_enabled: self.inactivity_reminders_enabled,
            inactivity_threshold_days: self.inactivity_threshold_days,
            quiet_hours_start: self
                .quiet_hours_start
                .as_deref()
                .map(parse_time_of_day)
                .transpose()?,
            quiet_hours_end: self
                .quiet_hours_end
                .as_deref()
                .map(parse_time_of_day)
                .transpose()?,
            max_reminders_per_day: self.max_reminders_per_day,
        })
    }
}

#[derive(Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRemindersRequest {
    #[serde(default)]
    bypass_quiet_hours: bool,
}

#[derive(Serialize, ToSchema)]
pub struct WarningResponse {
    code: &'static str,
    message: String,
}

impl From<PassWarning> for WarningResponse {
    fn from(w: PassWarning) -> Self {
        match w {
            PassWarning::MissingSettings => Self {
                code: "missing_settings",
                message: "Client has no reminder settings; all reminders were suppressed"
                    .to_string(),
            },
            PassWarning::InvalidSettings(detail) => Self {
                code: "invalid_settings",
                message: detail,
            },
            PassWarning::DetectorDataUnavailable(detail) => Self {
                code: "detector_data_unavailable",
                message: detail,
            },
            PassWarning::LedgerWriteFailed(detail) => Self {
                code: "ledger_write_failed",
                message: detail,
            },
        }
    }
}

/// The outcome of a synchronous reminder pass.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PassSummaryResponse {
    sent_count: u32,
    suppressed_count: u32,
    failed_count: u32,
    skipped_count: u32,
    warnings: Vec<WarningResponse>,
}

impl From<PassSummary> for PassSummaryResponse {
    fn from(s: PassSummary) -> Self {
        Self {
            sent_count: s.sent_count,
            suppressed_count: s.suppressed_count,
            failed_count: s.failed_count,
            skipped_count: s.skipped_count,
            warnings: s.warnings.into_iter().map(WarningResponse::from).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    id: Uuid,
    client_id: Uuid,
    #[schema(example = "inactivity")]
    category: &'static str,
    #[schema(example = "High")]
    severity: &'static str,
    description: String,
    detected_at: DateTime<Utc>,
}

impl From<Trigger> for TriggerResponse {
    fn from(t: Trigger) -> Self {
        Self {
            id: t.id,
            client_id: t.client_id,
            category: t.category.as_str(),
            severity: t.severity.as_str(),
            description: t.description,
            detected_at: t.detected_at,
        }
    }
}

/// An open trigger together with the editable message that would be sent.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPreviewResponse {
    trigger: TriggerResponse,
    template: &'static str,
    message: String,
}

impl From<ReminderPreview> for ReminderPreviewResponse {
    fn from(p: ReminderPreview) -> Self {
        Self {
            trigger: p.trigger.into(),
            template: p.message.template,
            message: p.message.body,
        }
    }
}

/// Confirms a reviewed reminder for sending.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendReminderRequest {
    trigger_id: Uuid,
    message: String,
    #[serde(default)]
    bypass_quiet_hours: bool,
}

/// One recorded reminder outcome.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    id: Uuid,
    client_id: Uuid,
    trigger_id: Uuid,
    channel: Option<&'static str>,
    composed_message: String,
    sent_at: DateTime<Utc>,
    #[schema(example = "suppressed")]
    status: &'static str,
    #[schema(example = "quiet_hours")]
    reason: Option<&'static str>,
    error: Option<String>,
}

impl From<ReminderDispatch> for DispatchResponse {
    fn from(d: ReminderDispatch) -> Self {
        let status = d.status.as_str();
        let (reason, error) = match d.status {
            DispatchStatus::Sent => (None, None),
            DispatchStatus::Suppressed(reason) => (Some(reason.as_str()), None),
            DispatchStatus::Failed(error) => (None, Some(error)),
        };
        Self {
            id: d.id,
            client_id: d.client_id,
            trigger_id: d.trigger_id,
            channel: d.channel.map(|c| c.as_str()),
            composed_message: d.composed_message,
            sent_at: d.sent_at,
            status,
            reason,
            error,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DispatchQuery {
    /// Number of outcomes to return, newest first (1-100, default 20).
    limit: Option<u32>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let storage = if app_state.config.database_url.is_some() {
        "postgres"
    } else {
        "memory"
    };
    Json(HealthResponse {
        status: "ok",
        storage,
    })
}

/// Get a client's reminder settings, creating the defaults on first access.
#[utoipa::path(
    get,
    path = "/clients/{id}/reminder-settings",
    params(("id" = Uuid, Path, description = "The client id.")),
    responses(
        (status = 200, description = "Current settings", body = ReminderSettingsResponse),
        (status = 404, description = "Unknown client")
    )
)]
pub async fn get_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<ReminderSettingsResponse>> {
    let client = load_client(&app_state, client_id).await?;
    let settings = app_state
        .store
        .get_or_create_settings(client.id, client.coach_id)
        .await?;
    Ok(Json(settings.into()))
}

/// Merge a partial update into a client's reminder settings.
///
/// Fields missing from the body keep their value. `id`, `clientId`,
/// `coachId`, `createdAt` and `updatedAt` are rejected.
#[utoipa::path(
    patch,
    path = "/clients/{id}/reminder-settings",
    params(("id" = Uuid, Path, description = "The client id.")),
    request_body = UpdateReminderSettingsRequest,
    responses(
        (status = 200, description = "Updated settings", body = ReminderSettingsResponse),
        (status = 400, description = "Immutable field, unknown field or out-of-range value"),
        (status = 404, description = "Unknown client")
    )
)]
pub async fn update_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<ReminderSettingsResponse>> {
    let client = load_client(&app_state, client_id).await?;
    let update = parse_settings_update(&body)?;
    update.validate()?;

    let settings = app_state
        .store
        .update_settings(client.id, client.coach_id, &update, Utc::now())
        .await?;

    info!(%client_id, "Reminder settings updated");
    Ok(Json(settings.into()))
}

/// Run a reminder pass for one client now and report the outcome.
#[utoipa::path(
    post,
    path = "/clients/{id}/trigger-reminders",
    params(("id" = Uuid, Path, description = "The client id.")),
    request_body(content = TriggerRemindersRequest, description = "Optional; `bypassQuietHours` defaults to false."),
    responses(
        (status = 200, description = "Pass summary", body = PassSummaryResponse),
        (status = 404, description = "Unknown client"),
        (status = 409, description = "A pass for this client is still running")
    )
)]
pub async fn trigger_reminders_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<PassSummaryResponse>> {
    let request: TriggerRemindersRequest = parse_optional_body(&body)?;
    let options = PassOptions {
        bypass_quiet_hours: request.bypass_quiet_hours,
    };
    let summary = app_state
        .scheduler
        .trigger_now(client_id, options, Utc::now())
        .await?;
    info!(
        %client_id,
        sent = summary.sent_count,
        suppressed = summary.suppressed_count,
        failed = summary.failed_count,
        "Manual reminder pass complete"
    );
    Ok(Json(summary.into()))
}

/// Detect and list the client's open triggers, most urgent first.
#[utoipa::path(
    get,
    path = "/clients/{id}/triggers",
    params(("id" = Uuid, Path, description = "The client id.")),
    responses(
        (status = 200, description = "Open triggers in dispatch order", body = [TriggerResponse]),
        (status = 404, description = "Unknown client"),
        (status = 503, description = "Activity data unavailable")
    )
)]
pub async fn list_triggers_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TriggerResponse>>> {
    let triggers = app_state
        .scheduler
        .detect_triggers(client_id, Utc::now())
        .await?;
    Ok(Json(triggers.into_iter().map(TriggerResponse::from).collect()))
}

/// Compose the message for every open trigger for review before sending.
#[utoipa::path(
    get,
    path = "/clients/{id}/reminder-previews",
    params(("id" = Uuid, Path, description = "The client id.")),
    responses(
        (status = 200, description = "Editable reminder drafts", body = [ReminderPreviewResponse]),
        (status = 404, description = "Unknown client"),
        (status = 503, description = "Activity data unavailable")
    )
)]
pub async fn preview_reminders_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ReminderPreviewResponse>>> {
    let previews = app_state.scheduler.preview(client_id, Utc::now()).await?;
    Ok(Json(
        previews
            .into_iter()
            .map(ReminderPreviewResponse::from)
            .collect(),
    ))
}

/// Send a reviewed, possibly edited, reminder for one open trigger.
#[utoipa::path(
    post,
    path = "/clients/{id}/reminders/send",
    params(("id" = Uuid, Path, description = "The client id.")),
    request_body = SendReminderRequest,
    responses(
        (status = 200, description = "The recorded outcome", body = DispatchResponse),
        (status = 400, description = "Empty message"),
        (status = 404, description = "Unknown client or trigger not open"),
        (status = 409, description = "Trigger already dispatched or client busy")
    )
)]
pub async fn send_reminder_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
    Json(request): Json<SendReminderRequest>,
) -> ApiResult<Json<DispatchResponse>> {
    let options = PassOptions {
        bypass_quiet_hours: request.bypass_quiet_hours,
    };
    let dispatch = app_state
        .scheduler
        .send_confirmed(
            client_id,
            request.trigger_id,
            &request.message,
            options,
            Utc::now(),
        )
        .await?;
    Ok(Json(dispatch.into()))
}

/// The client's most recent reminder outcomes, including suppression reasons.
#[utoipa::path(
    get,
    path = "/clients/{id}/reminder-dispatches",
    params(("id" = Uuid, Path, description = "The client id."), DispatchQuery),
    responses(
        (status = 200, description = "Newest outcomes first", body = [DispatchResponse]),
        (status = 400, description = "Invalid limit"),
        (status = 404, description = "Unknown client")
    )
)]
pub async fn list_dispatches_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_id): Path<Uuid>,
    Query(query): Query<DispatchQuery>,
) -> ApiResult<Json<Vec<DispatchResponse>>> {
    let limit = query.limit.unwrap_or(DEFAULT_DISPATCH_LIMIT);
    if limit == 0 || limit > MAX_DISPATCH_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_DISPATCH_LIMIT
        )));
    }
    load_client(&app_state, client_id).await?;
    let dispatches = app_state
        .store
        .recent_dispatches(client_id, limit)
        .await?;
    Ok(Json(
        dispatches.into_iter().map(DispatchResponse::from).collect(),
    ))
}

//=========================================================================================
// Helpers
//=========================================================================================

async fn load_client(app_state: &AppState, client_id: Uuid) -> ApiResult<ClientProfile> {
    Ok(app_state.directory.get_client(client_id).await?)
}

/// Parses a PATCH body. Immutable keys are rejected by name before the
/// typed parse so the caller learns which field was refused.
fn parse_settings_update(body: &[u8]) -> ApiResult<ReminderSettingsUpdate> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Body must be a JSON object".to_string()))?;
    if let Some(field) = IMMUTABLE_SETTINGS_FIELDS
        .iter()
        .find(|f| object.contains_key(**f))
    {
        return Err(ApiError::BadRequest(format!(
            "Field '{}' is immutable",
            field
        )));
    }
    let request: UpdateReminderSettingsRequest = serde_json::from_value(value)
        .map_err(|e| ApiError::BadRequest(format!("Invalid settings update: {}", e)))?;
    request.into_update()
}

fn parse_optional_body<T>(body: &[u8]) -> ApiResult<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}
