use std::sync::Arc;

use crate::config::Config;

/// A 32-byte BLAKE3 hash used for change detection.
///
/// The incremental bundler keys compiled modules by the hash of their source,
/// so a module is only recompiled when its bytes actually change.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        crate::utils::hex(&self.0)
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Which variant of the pipeline is wired into the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Debug bundle with source map, unmodified markup, live reload.
    Development,
    /// Minified bundle, path-rewritten markup, fatal failures.
    Production,
}

impl Profile {
    /// File name of the script bundle produced for this profile.
    pub fn bundle_name(self) -> &'static str {
        match self {
            Profile::Development => "build.js",
            Profile::Production => "build.min.js",
        }
    }
}

/// Read-only state shared by every task.
///
/// Built once at startup from the loaded [`Config`].
#[derive(Debug, Clone)]
pub struct Environment {
    pub config: Arc<Config>,
    /// Port of the live reload socket, when one is listening.
    pub reload_port: Option<u16>,
}

impl Environment {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            reload_port: None,
        }
    }

    pub fn with_reload_port(mut self, port: u16) -> Self {
        self.reload_port = Some(port);
        self
    }

    /// Returns a JavaScript snippet that reloads the page when the live
    /// reload socket says so, if a socket is listening.
    pub fn get_refresh_script(&self) -> Option<String> {
        self.reload_port.map(|port| {
            format!(
                r#"<script>
const socket = new WebSocket("ws://" + location.hostname + ":{port}");
socket.addEventListener("message", event => {{
    if (event.data === "reload") window.location.reload();
}});
</script>"#
            )
        })
    }
}
