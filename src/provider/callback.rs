//! Localhost callback listener for browser-redirect flows.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::Url;

use crate::{Error, Result};

const SUCCESS_PAGE: &str = "<html><body style=\"font-family: sans-serif; text-align: center; padding-top: 4em;\">\
<h2>Login complete</h2><p>You can close this tab and return to the application.</p></body></html>";

const FAILURE_PAGE: &str = "<html><body style=\"font-family: sans-serif; text-align: center; padding-top: 4em;\">\
<h2>Login failed</h2><p>Return to the application and try again.</p></body></html>";

/// One-shot localhost listener that receives the OAuth redirect.
///
/// The socket is bound eagerly in [`bind`](CallbackListener::bind) so a port
/// conflict surfaces before the user is sent to the browser, and it is
/// released when the listener is dropped, whichever way the login call exits.
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
    path: String,
}

impl CallbackListener {
    /// Bind `127.0.0.1:port`. Port 0 picks an ephemeral port (tests).
    pub async fn bind(port: u16, path: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::Callback(format!("failed to bind 127.0.0.1:{port}: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::Callback(e.to_string()))?
            .port();
        debug!(port, "callback listener bound");
        Ok(Self {
            listener,
            port,
            path: path.into(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI the provider must send the browser back to.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.path)
    }

    /// Accept connections until the redirect arrives, then return the
    /// `(code, state)` pair. Stray requests (favicon probes and the like)
    /// get a 404 and the listener keeps waiting. A redirect carrying an
    /// `error` parameter fails the login.
    pub async fn wait_for_code(&self) -> Result<(String, String)> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| Error::Callback(format!("accept failed: {e}")))?;
            debug!(%peer, "callback connection");

            match self.handle_connection(stream).await? {
                Some(result) => return result,
                None => continue,
            }
        }
    }

    /// Returns `None` when the request was not the redirect we wait for.
    async fn handle_connection(
        &self,
        mut stream: TcpStream,
    ) -> Result<Option<Result<(String, String)>>> {
        let mut buf = vec![0u8; 4096];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| Error::Callback(format!("read failed: {e}")))?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let Some(target) = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
        else {
            respond(&mut stream, 400, FAILURE_PAGE).await;
            return Ok(None);
        };

        if !target.starts_with(self.path.as_str()) {
            respond(&mut stream, 404, FAILURE_PAGE).await;
            return Ok(None);
        }

        // Resolve against a dummy base so the url crate handles decoding.
        let url = match Url::parse(&format!("http://localhost{target}")) {
            Ok(url) => url,
            Err(e) => {
                respond(&mut stream, 400, FAILURE_PAGE).await;
                return Ok(Some(Err(Error::Callback(format!(
                    "malformed redirect: {e}"
                )))));
            }
        };

        let (code, state, error) = extract_params(&url);
        if let Some(error) = error {
            respond(&mut stream, 200, FAILURE_PAGE).await;
            return Ok(Some(Err(Error::Callback(format!(
                "provider returned error: {error}"
            )))));
        }

        match (code, state) {
            (Some(code), Some(state)) => {
                respond(&mut stream, 200, SUCCESS_PAGE).await;
                Ok(Some(Ok((code, state))))
            }
            _ => {
                respond(&mut stream, 400, FAILURE_PAGE).await;
                Ok(Some(Err(Error::Callback(
                    "redirect missing code or state".into(),
                ))))
            }
        }
    }
}

/// Parse a full redirect URL pasted by the user (manual fallback for
/// listener flows). Accepts the same `code`/`state`/`error` parameters the
/// listener would have received.
pub fn parse_redirect_url(input: &str) -> Result<(String, String)> {
    let url = Url::parse(input.trim())
        .map_err(|e| Error::Callback(format!("not a valid redirect URL: {e}")))?;
    let (code, state, error) = extract_params(&url);
    if let Some(error) = error {
        return Err(Error::Callback(format!("provider returned error: {error}")));
    }
    match (code, state) {
        (Some(code), Some(state)) => Ok((code, state)),
        _ => Err(Error::Callback("redirect missing code or state".into())),
    }
}

fn extract_params(url: &Url) -> (Option<String>, Option<String>, Option<String>) {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    (code, state, error)
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Bad Request",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(error = %e, "failed to answer callback request");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[test]
    fn test_parse_redirect_url() {
        let (code, state) =
            parse_redirect_url("http://localhost:1455/auth/callback?code=abc123&state=xyz")
                .unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz");
    }

    #[test]
    fn test_parse_redirect_url_error_param() {
        let err =
            parse_redirect_url("http://localhost:8085/oauth2callback?error=access_denied")
                .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_parse_redirect_url_missing_code() {
        assert!(parse_redirect_url("http://localhost:8085/oauth2callback?state=x").is_err());
        assert!(parse_redirect_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_listener_receives_code() {
        let listener = CallbackListener::bind(0, "/auth/callback").await.unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /auth/callback?code=the-code&state=the-state HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response).await;
            String::from_utf8_lossy(&response).into_owned()
        });

        let (code, state) = listener.wait_for_code().await.unwrap();
        assert_eq!(code, "the-code");
        assert_eq!(state, "the-state");

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_listener_ignores_stray_requests() {
        let listener = CallbackListener::bind(0, "/auth/callback").await.unwrap();
        let port = listener.port();

        tokio::spawn(async move {
            let mut stray = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stray
                .write_all(b"GET /favicon.ico HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut sink = Vec::new();
            let _ = stray.read_to_end(&mut sink).await;

            let mut real = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            real.write_all(b"GET /auth/callback?code=c&state=s HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut sink = Vec::new();
            let _ = real.read_to_end(&mut sink).await;
        });

        let (code, state) = listener.wait_for_code().await.unwrap();
        assert_eq!(code, "c");
        assert_eq!(state, "s");
    }

    #[tokio::test]
    async fn test_provider_error_fails_login() {
        let listener = CallbackListener::bind(0, "/oauth2callback").await.unwrap();
        let port = listener.port();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /oauth2callback?error=access_denied HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let err = listener.wait_for_code().await.unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }
}
