use std::sync::Arc;

use crate::engine::Reloader;

/// Atomic reference-counted string type used for task names.
pub(crate) type ArcStr = Arc<str>;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// Transforms which are expensive to run (image optimization) key their
/// on-disk cache with it, so unchanged inputs are never processed twice.
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
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the orchestrator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// A one-time run of the requested tasks.
    #[default]
    Build,
    /// A serve session: tasks are re-triggered by file changes and failures
    /// are reported instead of aborting.
    Watch,
}

/// Global state available to every action.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// The current run mode.
    pub mode: Mode,
    /// Port of the live reload websocket, if one is open.
    pub port: Option<u16>,
}

impl Environment {
    pub fn build() -> Self {
        Self::default()
    }

    pub fn watch(port: Option<u16>) -> Self {
        Self {
            mode: Mode::Watch,
            port,
        }
    }

    /// Returns the JavaScript snippet which connects a page to the live
    /// reload socket.
    ///
    /// A `reload` message refreshes the whole page, a `css` message only
    /// re-fetches the stylesheets it names.
    pub fn refresh_script(&self) -> Option<String> {
        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://" + location.hostname + ":{port}");
socket.addEventListener("message", event => {{
    const msg = JSON.parse(event.data);
    if (msg.type !== "css") {{
        window.location.reload();
        return;
    }}
    for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
        const url = new URL(link.href);
        if (msg.paths.length === 0 || msg.paths.some(p => url.pathname.endsWith(p))) {{
            url.searchParams.set("tessen", Date.now());
            link.href = url.toString();
        }}
    }}
}});
"#
            )
        })
    }
}

/// The context passed to every action.
///
/// It is owned, so asynchronous actions can move it into the future they
/// return.
#[derive(Clone)]
pub struct TaskContext {
    /// Access to the global environment.
    pub env: Arc<Environment>,
    pub(crate) name: ArcStr,
    pub(crate) reloader: Reloader,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl TaskContext {
    /// Name of the task being executed.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Asks connected browsers to reload the page. Does nothing outside of a
    /// serve session.
    pub fn reload(&self) {
        self.reloader.reload();
    }

    /// Asks connected browsers to refresh the given stylesheets in place.
    pub fn inject_css<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reloader.inject_css(paths);
    }

    pub fn is_watching(&self) -> bool {
        self.env.mode == Mode::Watch
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("name", &self.name)
            .field("env", &self.env)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hash_hex() {
        let hex = Hash32::hash(b"tessen").to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex, Hash32::hash(b"tessen").to_hex());
        assert_ne!(hex, Hash32::hash(b"uchiwa").to_hex());
    }

    #[test]
    fn test_refresh_script() {
        assert!(Environment::build().refresh_script().is_none());

        let script = Environment::watch(Some(1337)).refresh_script().unwrap();
        assert!(script.contains(":1337"));
        assert!(script.contains("window.location.reload()"));
    }
}
