use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;

use crate::config::Config;

/// Serves the output root. Paths without a matching file get the markup
/// entry, so client-side routes survive a reload.
#[derive(Debug, Clone)]
pub struct DevServer {
    pub port: u16,
    pub root: Utf8PathBuf,
    pub fallback: Utf8PathBuf,
}

impl DevServer {
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.server.port,
            root: config.path(&config.dist),
            fallback: config.path(&config.markup.dest_dir).join("index.html"),
        }
    }

    pub fn start(self) -> thread::JoinHandle<anyhow::Result<()>> {
        let port = self.port;
        info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

        thread::spawn(move || {
            let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
            self.serve(listener)
        })
    }

    fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        listener.set_nonblocking(true)?;

        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                axum::serve(listener, self.router()).await?;
                Ok::<_, anyhow::Error>(())
            })
    }

    fn router(&self) -> Router {
        let files = ServeDir::new(&self.root).fallback(ServeFile::new(&self.fallback));
        Router::new().fallback_service(files)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    use super::*;
    use crate::loader::testing::Project;

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_serves_files_with_spa_fallback() {
        let project = Project::new();
        project
            .write("dist/index.html", "<html>todos</html>")
            .write("dist/js/build.js", "var app;");

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = DevServer::new(&project.config());
        thread::spawn(move || server.serve(listener));

        let script = get(port, "/js/build.js");
        assert!(script.starts_with("HTTP/1.1 200"));
        assert!(script.ends_with("var app;"));

        let route = get(port, "/active");
        assert!(route.starts_with("HTTP/1.1 200"));
        assert!(route.ends_with("<html>todos</html>"));
    }
}
