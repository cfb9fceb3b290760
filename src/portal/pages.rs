//! Server-rendered pages
//!
//! Minimal HTML. The dashboard layout resolves the session from the store:
//! no session redirects to sign-in and clears the session cookies, an
//! under-role session gets the access-denied card. The account page also
//! lists the caller's live sessions.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::account::OwnSession;
use crate::gate::CurrentUser;
use crate::identity::Session;
use crate::policy::{ACCOUNT, DASHBOARD, MANAGE_PERMISSIONS, MANAGE_PROJECTS, MANAGE_USERS, SIGN_IN};
use crate::portal::state::AppState;
use crate::role::Role;
use crate::session::CurrentSession;

/// Page routes; the edge guard and session layers are added by the server
pub fn pages_router(state: AppState) -> Router {
    Router::new()
        .route(SIGN_IN, get(sign_in_page))
        .route(DASHBOARD, get(dashboard_page))
        .route(ACCOUNT, get(dashboard_page))
        .route(MANAGE_PROJECTS, get(dashboard_page))
        .route(MANAGE_USERS, get(dashboard_page))
        .route(MANAGE_PERMISSIONS, get(dashboard_page))
        .with_state(state)
}

async fn sign_in_page() -> Html<&'static str> {
    Html(SIGN_IN_HTML)
}

/// Every dashboard page shares one layout guard
async fn dashboard_page(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    uri: Uri,
) -> Response {
    // A cache cookie that outlived its store session would bounce the
    // browser between here and the sign-in page, so both cookies are cleared
    let Some(session) = session else {
        let (token_cookie, cache_cookie) = state.auth.build_logout_cookies();
        let jar = CookieJar::new().add(token_cookie).add(cache_cookie);
        return (jar, Redirect::temporary(SIGN_IN)).into_response();
    };

    let current = CurrentUser::from_session(Some(&session));
    let path = uri.path();
    let required = state.policy.min_role_for_route(path).unwrap_or(Role::Visitor);

    let content = if current.has_minimum_role(required) {
        let mut content = format!(
            "<h1>{}</h1>\n<p>Signed in as {} ({})</p>",
            page_title(path),
            escape_html(&session.user.name),
            session.user.role
        );
        if path == ACCOUNT {
            let sessions = match state.account.list_sessions(&session).await {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!("Could not list sessions for {}: {}", session.user.id, e);
                    Vec::new()
                }
            };
            content.push_str(&account_section(&session, &sessions));
        }
        content
    } else {
        ACCESS_DENIED_CARD.to_string()
    };

    let nav: String = state
        .policy
        .routes_for_role(current.role)
        .iter()
        .map(|nav| format!("<li><a href=\"{}\">{}</a></li>", nav.path, nav.title))
        .collect();

    let body = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"><title>{} | Internal Portal</title></head>\n<body>\n<nav><ul>{}</ul></nav>\n<main>\n{}\n</main>\n</body>\n</html>",
        page_title(path),
        nav,
        content
    );

    let status = if current.has_minimum_role(required) {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };

    (status, Html(body)).into_response()
}

fn account_section(session: &Session, sessions: &[OwnSession]) -> String {
    let user = &session.user;
    let avatar = match &user.image {
        Some(url) => format!("<img src=\"{}\" alt=\"Avatar\">", escape_html(url)),
        None => "<p>No avatar</p>".to_string(),
    };
    let rows: String = sessions
        .iter()
        .map(|own| {
            format!(
                "<li data-session-id=\"{}\">{} &middot; {} &middot; expires {}{}</li>",
                escape_html(&own.session.id),
                escape_html(own.session.ip_address.as_deref().unwrap_or("unknown IP")),
                escape_html(own.session.user_agent.as_deref().unwrap_or("unknown device")),
                own.session.expires_at.format("%Y-%m-%d %H:%M UTC"),
                if own.current { " (current)" } else { "" }
            )
        })
        .collect();

    format!(
        "<section class=\"account\">\n<dl><dt>Name</dt><dd>{}</dd><dt>Email</dt><dd>{}</dd></dl>\n{}\n<h2>Sessions</h2>\n<ul>{}</ul>\n</section>",
        escape_html(&user.name),
        escape_html(&user.email),
        avatar,
        rows
    )
}

fn page_title(path: &str) -> &'static str {
    match path {
        ACCOUNT => "Account",
        MANAGE_PROJECTS => "Manage Projects",
        MANAGE_USERS => "Manage Users",
        MANAGE_PERMISSIONS => "Manage Permissions",
        _ => "Home",
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const ACCESS_DENIED_CARD: &str = r#"<section class="access-denied">
<h2>Access Denied</h2>
<p>You don't have permission to access this page. Please contact an administrator if you believe this is an error.</p>
<a href="/dashboard">Go Back</a>
</section>"#;

const SIGN_IN_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Internal Portal</title>
</head>
<body>
    <h1>Internal Portal</h1>
    <p>Sign in to access your dashboard</p>
    <form id="sign-in">
        <input type="email" name="email" placeholder="Email" required>
        <input type="password" name="password" placeholder="Password" minlength="8" required>
        <button type="submit">Sign in</button>
    </form>
    <p id="error"></p>
    <p>For access issues, contact your administrator</p>
    <script>
        document.getElementById('sign-in').addEventListener('submit', async (e) => {
            e.preventDefault();
            const form = new FormData(e.target);
            const res = await fetch('/api/auth/sign-in/email', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ email: form.get('email'), password: form.get('password') }),
            });
            if (res.ok) {
                window.location.href = '/dashboard';
            } else {
                const data = await res.json().catch(() => ({}));
                document.getElementById('error').textContent = data.message || 'Sign in failed';
            }
        });
    </script>
</body>
</html>"#;
