use axum::extract::{Query, State};

use crate::error::AppResult;
use crate::state::AppState;
use crate::types::{PageQuery, Paginated, Pagination, UserDto};

/// `GET /admin/users?page=&limit=`
pub async fn list_users(State(state): State<AppState>, Query(q): Query<PageQuery>) -> AppResult<Paginated<UserDto>> {
    let (page, limit) = q.resolve();
    let (users, total) = state.users.list(page, limit).await?;
    let data = users.iter().map(UserDto::from).collect();
    Ok(Paginated::new(data, Pagination::new(page, limit, total)))
}
