use std::{net::SocketAddr, thread};

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serve `out` on `127.0.0.1:<port>` from a dedicated thread. HTML
/// responses connect back to the reload socket on `ws_port`.
pub fn start(out: Utf8PathBuf, port: u16, ws_port: u16) -> thread::JoinHandle<()> {
    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|rt| rt.block_on(serve(out, port, ws_port)));

        if let Err(e) = result {
            tracing::error!("HTTP server stopped: {e}");
        }
    })
}

async fn serve(out: Utf8PathBuf, port: u16, ws_port: u16) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let router = Router::new()
        .fallback_service(ServeDir::new(out))
        .layer(middleware::from_fn_with_state(ws_port, inject));

    axum::serve(address, router).await?;

    Ok(())
}

async fn inject(State(ws_port): State<u16>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't read response body: {e}");
            parts.status = StatusCode::INTERNAL_SERVER_ERROR;
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let html = with_reload_script(&String::from_utf8_lossy(&bytes), ws_port);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Insert the live reload client before `</body>`, or append it when the
/// document has no closing body tag.
pub(crate) fn with_reload_script(html: &str, ws_port: u16) -> String {
    let script = format!(
        concat!(
            "<script>(function(){{",
            "var s=new WebSocket('ws://'+location.hostname+':{port}');",
            "s.onmessage=function(e){{if(e.data==='reload')location.reload();}};",
            "}})();</script>"
        ),
        port = ws_port
    );

    match html.rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..pos]);
            out.push_str(&script);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}{script}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_before_closing_body() {
        let html = with_reload_script("<html><body><p>hi</p></body></html>", 1337);

        assert!(html.starts_with("<html><body><p>hi</p><script>"));
        assert!(html.ends_with("</script></body></html>"));
        assert!(html.contains(":1337'"));
    }

    #[test]
    fn test_script_appended_without_body() {
        let html = with_reload_script("<p>fragment</p>", 4000);

        assert!(html.starts_with("<p>fragment</p><script>"));
        assert!(html.contains(":4000'"));
    }
}
