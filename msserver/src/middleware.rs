//! En-têtes appliqués à toutes les réponses.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use mssource::generate_id;

/// Nom du cookie identifiant le client.
pub const SESSION_COOKIE: &str = "sessionId";

/// En-têtes des réponses REST en JSON.
pub fn rest_headers() -> [(header::HeaderName, &'static str); 3] {
    [
        (
            header::CACHE_CONTROL,
            "no-cache, no-store, must-revalidate, public, max-age=0",
        ),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
    ]
}

/// Valeur du cookie de session envoyé par le client, s'il y en a un.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Middleware commun : CORS ouvert, `no-cache` par défaut, cookie de session.
pub async fn common_headers(request: Request, next: Next) -> Response {
    let has_session = session_id(request.headers()).is_some_and(|id| !id.is_empty());
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if !headers.contains_key(header::CACHE_CONTROL) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    if !has_session {
        let cookie = format!("{SESSION_COOKIE}={}; Path=/", generate_id());
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(header::SET_COOKIE, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sessionId=AbC23; other=1"),
        );
        assert_eq!(session_id(&headers).as_deref(), Some("AbC23"));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sessionIdx=1"));
        assert_eq!(session_id(&headers), None);
    }
}
