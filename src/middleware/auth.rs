use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::context::RequestContext;
use crate::error::AppError;
use crate::state::AppState;
use crate::token::{extract_from_header, Claims, Role, TokenKind};

/// Verifies the bearer access token and extends the request context with the
/// caller's identity.
///
/// Expired and invalid tokens fail distinctly so the client knows when a
/// refresh is worth attempting.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let authorization = req.headers().get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()).map(str::to_string);
    match authenticate(&state, authorization.as_deref()).await {
        Ok(claims) => {
            let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
                return AppError::Internal(anyhow::anyhow!("request context missing")).into_response();
            };
            req.extensions_mut().insert(ctx.with_identity(claims));
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

async fn authenticate(state: &AppState, authorization: Option<&str>) -> Result<Claims, AppError> {
    let token = authorization
        .and_then(extract_from_header)
        .ok_or_else(|| AppError::Unauthorized("Not authorized, no token".to_string()))?;

    let claims = state.tokens.verify(token, TokenKind::Access)?;

    // Tokens outlive deleted accounts
    if state.users.find_by_id(&claims.sub).await?.is_none() {
        return Err(AppError::Unauthorized("User no longer exists".to_string()));
    }
    Ok(claims)
}

/// Must run inside [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Response {
    let role = req.extensions().get::<RequestContext>().and_then(|ctx| ctx.identity()).map(|c| c.role);
    match role {
        Some(Role::Admin) => next.run(req).await,
        Some(_) => AppError::Forbidden("Admin access required".to_string()).into_response(),
        None => AppError::Unauthorized("Not authorized, no token".to_string()).into_response(),
    }
}
