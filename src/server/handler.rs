//! Application callbacks invoked by connection drivers.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;

/// Receives connection events.
///
/// Every method has a no-op default. Per connection the calls arrive in the
/// order `on_connect`, any number of `on_message`/`on_binary`, then
/// `on_disconnect`; `on_error` may come before `on_disconnect`. Different
/// connections call in concurrently, so implementations must be `Sync`.
pub trait Handler: Send + Sync + 'static {
    /// The upgrade completed for `client_ip`.
    fn on_connect(&self, client_ip: &str) {
        let _ = client_ip;
    }

    /// A text message arrived; a returned string is sent back as a text frame.
    fn on_message(&self, client_ip: &str, text: &str) -> Option<String> {
        let _ = (client_ip, text);
        None
    }

    /// A binary message arrived; returned bytes are sent back as a binary frame.
    fn on_binary(&self, client_ip: &str, data: &[u8]) -> Option<Vec<u8>> {
        let _ = (client_ip, data);
        None
    }

    /// A connection that fired `on_connect` has closed.
    fn on_disconnect(&self, client_ip: &str) {
        let _ = client_ip;
    }

    /// A connection failed for any reason other than a clean peer close.
    fn on_error(&self, client_ip: &str, error: &Error) {
        let _ = (client_ip, error);
    }
}

type ConnectFn = Arc<dyn Fn(&str) + Send + Sync>;
type MessageFn = Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;
type BinaryFn = Arc<dyn Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Closure-based [`Handler`].
///
/// ```
/// use wsgate::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .on_connect(|ip| println!("{ip} connected"))
///     .on_message(|_ip, text| Some(format!("Echo: {text}")));
/// # let _ = callbacks;
/// ```
#[derive(Clone, Default)]
pub struct Callbacks {
    connect: Option<ConnectFn>,
    message: Option<MessageFn>,
    binary: Option<BinaryFn>,
    disconnect: Option<ConnectFn>,
    error: Option<ErrorFn>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_connect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.connect = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_message(
        mut self,
        f: impl Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.message = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_binary(
        mut self,
        f: impl Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.binary = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_disconnect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.disconnect = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&str, &Error) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }
}

impl Handler for Callbacks {
    fn on_connect(&self, client_ip: &str) {
        if let Some(f) = &self.connect {
            f(client_ip);
        }
    }

    fn on_message(&self, client_ip: &str, text: &str) -> Option<String> {
        self.message.as_ref().and_then(|f| f(client_ip, text))
    }

    fn on_binary(&self, client_ip: &str, data: &[u8]) -> Option<Vec<u8>> {
        self.binary.as_ref().and_then(|f| f(client_ip, data))
    }

    fn on_disconnect(&self, client_ip: &str) {
        if let Some(f) = &self.disconnect {
            f(client_ip);
        }
    }

    fn on_error(&self, client_ip: &str, error: &Error) {
        if let Some(f) = &self.error {
            f(client_ip, error);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.connect.is_some())
            .field("on_message", &self.message.is_some())
            .field("on_binary", &self.binary.is_some())
            .field("on_disconnect", &self.disconnect.is_some())
            .field("on_error", &self.error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Silent;
    impl Handler for Silent {}

    #[test]
    fn test_default_methods_are_noops() {
        let handler = Silent;
        handler.on_connect("1.2.3.4");
        assert_eq!(handler.on_message("1.2.3.4", "hi"), None);
        assert_eq!(handler.on_binary("1.2.3.4", &[1]), None);
        handler.on_disconnect("1.2.3.4");
        handler.on_error("1.2.3.4", &Error::InvalidUtf8);
    }

    #[test]
    fn test_callbacks_dispatch() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&events);
        let log2 = Arc::clone(&events);
        let callbacks = Callbacks::new()
            .on_connect(move |ip| log.lock().unwrap().push(format!("connect {ip}")))
            .on_message(|_, text| Some(format!("Echo: {text}")))
            .on_binary(|_, data| Some(data.iter().rev().copied().collect()))
            .on_disconnect(move |ip| log2.lock().unwrap().push(format!("disconnect {ip}")));

        // The builder setters share these names, so dispatch through the trait.
        let handler: &dyn Handler = &callbacks;
        handler.on_connect("a");
        assert_eq!(handler.on_message("a", "hi"), Some("Echo: hi".to_string()));
        assert_eq!(handler.on_binary("a", &[1, 2, 3]), Some(vec![3, 2, 1]));
        handler.on_disconnect("a");
        handler.on_error("a", &Error::InvalidUtf8);

        assert_eq!(*events.lock().unwrap(), vec!["connect a", "disconnect a"]);
    }

    #[test]
    fn test_empty_callbacks() {
        let callbacks = Callbacks::new();
        assert_eq!(Handler::on_message(&callbacks, "a", "hi"), None);
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("on_message: false"));
    }
}
