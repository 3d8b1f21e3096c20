//! # REST API
//!
//! Builds the axum router that exposes the authentication server over
//! JSON. All endpoints share application state through axum's `State`
//! extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                   | Description                          |
//! |--------|----------------------------------------|--------------------------------------|
//! | GET    | `/health`                              | Liveness probe                       |
//! | POST   | `/v1/challenge`                        | Issue a challenge for a public key   |
//! | POST   | `/v1/challenge/verify`                 | Answer a challenge, mint a session   |
//! | GET    | `/v1/sessions/:token`                  | Resolve a session token              |
//! | POST   | `/v1/credentials`                      | Register a hashed credential         |
//! | GET    | `/v1/credentials/root`                 | Current Merkle root                  |
//! | GET    | `/v1/credentials/:credential/wallet`   | Wallet minted for a credential       |
//! | POST   | `/v1/proofs/membership`                | Generate a Groth16 membership proof  |
//! | POST   | `/v1/proofs/membership/verify`         | Verify a membership proof            |
//!
//! Errors come back as `{"error": "..."}` with the status the core assigns.
//! Crypto and constraint failures carry a generic message only.
//!
//! Orchestrator calls block: they take the registry lock, touch the store,
//! rebuild the Poseidon tree or run pairings. Handlers send them to tokio's
//! blocking pool through [`run_blocking`].

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keyless_auth::crypto::hash::field_to_hex;
use keyless_auth::session::IssuedChallenge;
use keyless_auth::{AuthError, AuthOrchestrator, AuthResult, RegistrationReceipt};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone. Everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub orchestrator: AuthOrchestrator,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/challenge", post(issue_challenge_handler))
        .route("/v1/challenge/verify", post(verify_challenge_handler))
        .route("/v1/sessions/:token", get(session_handler))
        .route("/v1/credentials", post(register_credential_handler))
        .route("/v1/credentials/root", get(root_handler))
        .route("/v1/credentials/:credential/wallet", get(wallet_handler))
        .route("/v1/proofs/membership", post(generate_proof_handler))
        .route("/v1/proofs/membership/verify", post(verify_proof_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An [`AuthError`] on its way out of a handler.
pub struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        let body = ErrorResponse {
            error: self.0.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Credentials registered so far.
    pub leaves: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeRequest {
    /// Uncompressed SEC1 P-256 public key, hex.
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyChallengeRequest {
    pub decrypted_payload: String,
    /// `r || s`, hex.
    pub signature: String,
    pub ephemeral_public_key: String,
    pub claimant_public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyChallengeResponse {
    pub session_token: String,
    pub public_key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub public_key: String,
    pub verified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterCredentialRequest {
    /// Salted SHA-256 of the raw credential, 64 hex characters.
    pub hashed_credential: String,
}

/// Response payload for `GET /v1/credentials/root`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub merkle_root: String,
    pub num_leaves: u64,
    pub depth: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub wallet_address: String,
    pub merkle_root_at_creation: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipProofRequest {
    pub leaf: String,
    pub root: String,
    pub siblings: Vec<String>,
    /// One bit per level: 0 when the sibling sits on the left, 1 on the right.
    pub direction: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MembershipProofResponse {
    /// Compressed Groth16 proof, hex.
    pub proof_bytes: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyMembershipRequest {
    pub proof_bytes: String,
    pub root: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyMembershipResponse {
    pub valid: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Run `f` against the orchestrator on the blocking pool.
async fn run_blocking<T, F>(state: &AppState, f: F) -> AuthResult<T>
where
    F: FnOnce(&AuthOrchestrator) -> AuthResult<T> + Send + 'static,
    T: Send + 'static,
{
    let orchestrator = state.orchestrator.clone();
    tokio::task::spawn_blocking(move || f(&orchestrator))
        .await
        .map_err(|e| AuthError::Internal(format!("blocking task failed: {e}")))?
}

async fn health_handler(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    let summary = run_blocking(&state, |o| o.merkle_root()).await?;
    Ok(Json(HealthResponse {
        status: "ok".into(),
        version: state.version.clone(),
        leaves: summary.leaf_count,
    }))
}

async fn issue_challenge_handler(
    State(state): State<AppState>,
    Json(req): Json<ChallengeRequest>,
) -> ApiResult<IssuedChallenge> {
    let issued = run_blocking(&state, move |o| o.issue_challenge(&req.public_key)).await?;
    state.metrics.challenges_issued_total.inc();
    refresh_active_challenges(&state);
    Ok(Json(issued))
}

async fn verify_challenge_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyChallengeRequest>,
) -> ApiResult<VerifyChallengeResponse> {
    let result = run_blocking(&state, move |o| {
        o.verify_challenge(
            &req.claimant_public_key,
            &req.decrypted_payload,
            &req.signature,
            &req.ephemeral_public_key,
        )
    })
    .await;
    refresh_active_challenges(&state);

    match result {
        Ok(identity) => {
            state.metrics.challenges_verified_total.inc();
            Ok(Json(VerifyChallengeResponse {
                session_token: identity.session_token,
                public_key: identity.public_key.to_hex(),
                expires_at: identity.expires_at,
            }))
        }
        Err(err) => {
            state.metrics.challenges_failed_total.inc();
            Err(err.into())
        }
    }
}

async fn session_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<SessionResponse> {
    let identity = state.orchestrator.resolve_session(&token)?;
    Ok(Json(SessionResponse {
        public_key: identity.public_key.to_hex(),
        verified_at: identity.verified_at,
        expires_at: identity.expires_at,
    }))
}

async fn register_credential_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterCredentialRequest>,
) -> ApiResult<RegistrationReceipt> {
    let receipt = run_blocking(&state, move |o| o.register_credential(&req.hashed_credential)).await?;
    state.metrics.credentials_registered_total.inc();
    state
        .metrics
        .registered_credentials
        .set((receipt.proof.leaf_index + 1) as i64);
    Ok(Json(receipt))
}

async fn root_handler(State(state): State<AppState>) -> ApiResult<RootResponse> {
    let summary = run_blocking(&state, |o| o.merkle_root()).await?;
    Ok(Json(RootResponse {
        merkle_root: field_to_hex(&summary.root),
        num_leaves: summary.leaf_count,
        depth: summary.depth,
    }))
}

async fn wallet_handler(
    State(state): State<AppState>,
    Path(credential): Path<String>,
) -> ApiResult<WalletResponse> {
    let wallet = state.orchestrator.wallet_for_credential(&credential)?;
    Ok(Json(WalletResponse {
        wallet_address: wallet.address,
        merkle_root_at_creation: wallet.merkle_root_at_creation,
    }))
}

async fn generate_proof_handler(
    State(state): State<AppState>,
    Json(req): Json<MembershipProofRequest>,
) -> ApiResult<MembershipProofResponse> {
    let timer = state.metrics.proving_seconds.start_timer();
    let proof = state
        .orchestrator
        .generate_membership_proof_async(req.leaf, req.root, req.siblings, req.direction)
        .await;
    timer.observe_duration();

    let proof = proof?;
    state.metrics.membership_proofs_generated_total.inc();
    Ok(Json(MembershipProofResponse {
        proof_bytes: proof.to_hex(),
    }))
}

async fn verify_proof_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyMembershipRequest>,
) -> ApiResult<VerifyMembershipResponse> {
    let valid = run_blocking(&state, move |o| {
        o.verify_membership_proof(&req.proof_bytes, &req.root)
    })
    .await?;
    if valid {
        state.metrics.membership_proofs_verified_total.inc();
    } else {
        state.metrics.membership_proofs_rejected_total.inc();
    }
    Ok(Json(VerifyMembershipResponse { valid }))
}

/// Re-read the active challenge count into its gauge. Best effort.
pub fn refresh_active_challenges(state: &AppState) {
    match state.orchestrator.sessions().active_count() {
        Ok(n) => state.metrics.active_challenges.set(n as i64),
        Err(e) => tracing::warn!(error = %e, "could not count active challenges"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use keyless_auth::clock;
    use keyless_auth::config::AuthConfig;
    use keyless_auth::crypto::{hash_credential, KeyPair};
    use keyless_auth::session::respond_to_challenge;
    use keyless_auth::storage::MemoryStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Depth 3 keeps Groth16 setup fast enough for unit tests.
    const TEST_DEPTH: usize = 3;

    /// Creates a test AppState backed by an in-memory store.
    fn test_app_state() -> AppState {
        let config = AuthConfig {
            max_tree_depth: TEST_DEPTH,
            ..AuthConfig::default()
        };
        let orchestrator = AuthOrchestrator::from_entropy(
            Arc::new(MemoryStore::new()),
            clock::system(),
            KeyPair::generate(),
            config,
        )
        .expect("orchestrator");

        AppState {
            version: "0.1.0-test".into(),
            orchestrator,
            metrics: Arc::new(crate::metrics::NodeMetrics::new().expect("metrics")),
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    fn error_message(body: &[u8]) -> String {
        serde_json::from_slice::<ErrorResponse>(body).unwrap().error
    }

    // -- Health --------------------------------------------------------------

    #[tokio::test]
    async fn orchestrator_calls_leave_the_runtime_thread() {
        let state = test_app_state();
        let caller = std::thread::current().id();
        let worker = run_blocking(&state, |_| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn health_endpoint_reports_leaves() {
        let state = test_app_state();
        state
            .orchestrator
            .register_credential(&hash_credential(b"a"))
            .unwrap();
        let router = create_router(state);
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let resp: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.leaves, 1);
    }

    // -- Challenge flow ------------------------------------------------------

    #[tokio::test]
    async fn challenge_round_trip_mints_session() {
        let state = test_app_state();
        let server_key = state.orchestrator.server_public_key();
        let router = create_router(state.clone());
        let user = KeyPair::generate();

        let (status, body) = post_json(
            &router,
            "/v1/challenge",
            serde_json::json!({ "public_key": user.public_key().to_hex() }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let issued: IssuedChallenge = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.metrics.active_challenges.get(), 1);

        let answer = respond_to_challenge(&user, &server_key, &issued).unwrap();
        let (status, body) = post_json(
            &router,
            "/v1/challenge/verify",
            serde_json::json!({
                "decrypted_payload": answer.decrypted_payload,
                "signature": answer.signature.to_hex(),
                "ephemeral_public_key": answer.ephemeral_public_key.to_hex(),
                "claimant_public_key": answer.claimant_public_key.to_hex(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let verified: VerifyChallengeResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(verified.public_key, user.public_key().to_hex());
        assert_eq!(state.metrics.challenges_verified_total.get(), 1);
        assert_eq!(state.metrics.active_challenges.get(), 0);

        let (status, body) = get(&router, &format!("/v1/sessions/{}", verified.session_token)).await;
        assert_eq!(status, StatusCode::OK);
        let session: SessionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(session.public_key, verified.public_key);
        assert_eq!(session.expires_at, verified.expires_at);
    }

    #[tokio::test]
    async fn replayed_answer_is_not_found() {
        let state = test_app_state();
        let server_key = state.orchestrator.server_public_key();
        let router = create_router(state);
        let user = KeyPair::generate();

        let (_, body) = post_json(
            &router,
            "/v1/challenge",
            serde_json::json!({ "public_key": user.public_key().to_hex() }),
        )
        .await;
        let issued: IssuedChallenge = serde_json::from_slice(&body).unwrap();
        let answer = respond_to_challenge(&user, &server_key, &issued).unwrap();
        let request = serde_json::json!({
            "decrypted_payload": answer.decrypted_payload,
            "signature": answer.signature.to_hex(),
            "ephemeral_public_key": answer.ephemeral_public_key.to_hex(),
            "claimant_public_key": answer.claimant_public_key.to_hex(),
        });

        let (status, _) = post_json(&router, "/v1/challenge/verify", request.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = post_json(&router, "/v1/challenge/verify", request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_payload_is_unauthorized_with_generic_message() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let user = KeyPair::generate();

        let (_, body) = post_json(
            &router,
            "/v1/challenge",
            serde_json::json!({ "public_key": user.public_key().to_hex() }),
        )
        .await;
        let issued: IssuedChallenge = serde_json::from_slice(&body).unwrap();
        let guess = "00".repeat(32);
        let (status, body) = post_json(
            &router,
            "/v1/challenge/verify",
            serde_json::json!({
                "decrypted_payload": guess,
                "signature": user.sign(guess.as_bytes()).unwrap().to_hex(),
                "ephemeral_public_key": issued.ephemeral_public_key.to_hex(),
                "claimant_public_key": user.public_key().to_hex(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(&body), "unauthorized");
        assert_eq!(state.metrics.challenges_failed_total.get(), 1);
    }

    #[tokio::test]
    async fn malformed_public_key_is_bad_request() {
        let router = create_router(test_app_state());
        let (status, _) = post_json(
            &router,
            "/v1/challenge",
            serde_json::json!({ "public_key": "04abcd" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, "/v1/sessions/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- Credentials ---------------------------------------------------------

    #[tokio::test]
    async fn register_then_query_root_and_wallet() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let cred = hash_credential(b"alice@example.com");

        let (status, body) = post_json(
            &router,
            "/v1/credentials",
            serde_json::json!({ "hashed_credential": cred }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let receipt: RegistrationReceipt = serde_json::from_slice(&body).unwrap();
        assert!(receipt.proof.verify());
        assert_eq!(state.metrics.registered_credentials.get(), 1);

        let (status, body) = get(&router, "/v1/credentials/root").await;
        assert_eq!(status, StatusCode::OK);
        let root: RootResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(root.merkle_root, receipt.merkle_root);
        assert_eq!(root.num_leaves, 1);

        let (status, body) = get(&router, &format!("/v1/credentials/{cred}/wallet")).await;
        assert_eq!(status, StatusCode::OK);
        let wallet: WalletResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(wallet.wallet_address, receipt.wallet_address);
        assert_eq!(wallet.merkle_root_at_creation, receipt.merkle_root);
    }

    #[tokio::test]
    async fn duplicate_registration_is_bad_request() {
        let router = create_router(test_app_state());
        let body = serde_json::json!({ "hashed_credential": hash_credential(b"bob") });

        let (status, _) = post_json(&router, "/v1/credentials", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = post_json(&router, "/v1/credentials", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_message(&body).contains("already registered"));
    }

    #[tokio::test]
    async fn wallet_for_unknown_credential_is_not_found() {
        let router = create_router(test_app_state());
        let (status, _) = get(
            &router,
            &format!("/v1/credentials/{}/wallet", hash_credential(b"nobody")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- Membership proofs ---------------------------------------------------

    #[tokio::test]
    async fn membership_proof_round_trip() {
        let state = test_app_state();
        let router = create_router(state.clone());
        for raw in ["a", "b", "c"] {
            state
                .orchestrator
                .register_credential(&hash_credential(raw.as_bytes()))
                .unwrap();
        }
        let proof = state
            .orchestrator
            .inclusion_proof_for(&hash_credential(b"b"))
            .unwrap();

        let (status, body) = post_json(
            &router,
            "/v1/proofs/membership",
            serde_json::json!({
                "leaf": proof.leaf,
                "root": proof.root,
                "siblings": proof.siblings,
                "direction": proof.directions,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let generated: MembershipProofResponse = serde_json::from_slice(&body).unwrap();

        let (status, body) = post_json(
            &router,
            "/v1/proofs/membership/verify",
            serde_json::json!({ "proof_bytes": generated.proof_bytes, "root": proof.root }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let verdict: VerifyMembershipResponse = serde_json::from_slice(&body).unwrap();
        assert!(verdict.valid);
        assert_eq!(state.metrics.membership_proofs_generated_total.get(), 1);
        assert_eq!(state.metrics.membership_proofs_verified_total.get(), 1);
    }

    #[tokio::test]
    async fn tampered_witness_is_unprocessable() {
        let state = test_app_state();
        let router = create_router(state.clone());
        for raw in ["a", "b"] {
            state
                .orchestrator
                .register_credential(&hash_credential(raw.as_bytes()))
                .unwrap();
        }
        let mut proof = state
            .orchestrator
            .inclusion_proof_for(&hash_credential(b"a"))
            .unwrap();
        proof.siblings[0] = proof.leaf.clone();

        let (status, body) = post_json(
            &router,
            "/v1/proofs/membership",
            serde_json::json!({
                "leaf": proof.leaf,
                "root": proof.root,
                "siblings": proof.siblings,
                "direction": proof.directions,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_message(&body), "proof witness could not be verified");
    }

    #[tokio::test]
    async fn garbage_proof_bytes_are_bad_request() {
        let state = test_app_state();
        let root = state.orchestrator.merkle_root_hex().unwrap();
        let router = create_router(state);
        let (status, _) = post_json(
            &router,
            "/v1/proofs/membership/verify",
            serde_json::json!({ "proof_bytes": "00ff", "root": root }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
