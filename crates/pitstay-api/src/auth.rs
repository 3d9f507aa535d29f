use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use pitstay_core::{
    BookingEngine, BookingPolicy, Clock, MessagingService, NotificationService, PointsLedger,
    SystemClock,
};
use pitstay_db::Database;
use pitstay_gateway::Dispatcher;
use pitstay_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use pitstay_types::events::ChangeSink;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub engine: BookingEngine,
    pub ledger: PointsLedger,
    pub messaging: MessagingService,
    pub notifications: NotificationService,
}

impl AppStateInner {
    /// Wire every service to the same store, change sink and wall clock.
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, jwt_secret: String, policy: BookingPolicy) -> Self {
        Self::with_clock(db, dispatcher, jwt_secret, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        jwt_secret: String,
        policy: BookingPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sink: Arc<dyn ChangeSink> = Arc::new(dispatcher.clone());
        Self {
            engine: BookingEngine::new(db.clone(), sink.clone(), clock.clone(), policy),
            ledger: PointsLedger::new(db.clone(), sink.clone(), clock.clone()),
            messaging: MessagingService::new(db.clone(), sink.clone(), clock.clone()),
            notifications: NotificationService::new(db.clone(), sink, clock),
            db,
            jwt_secret,
            dispatcher,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    // Check if username is taken
    if state.db.get_user_by_username(&req.username)?.is_some() {
        return Err(ApiError::UsernameTaken);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();

    let user_id = Uuid::new_v4();
    state.db.create_user(user_id, &req.username, &password_hash)?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)?;
    info!(%user_id, username = %req.username, "user registered");

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_username(&req.username)?
        .ok_or(ApiError::Unauthenticated)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash is malformed: {e}"))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthenticated)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("stored user id is malformed: {e}"))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse { user_id, username: user.username, token }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
