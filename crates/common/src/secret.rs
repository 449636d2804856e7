//! Redacting wrapper for refresh tokens and client secrets

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value. Redacted in Debug/Display so it never reaches the logs,
/// and wiped from memory on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Wrap a sensitive value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the inner value. Only call at the point the value leaves the
    /// process (request bodies, headers).
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_token_is_redacted_in_debug() {
        let token = Secret::from("aorAAAAAGexample-refresh");
        let debug = format!("{token:?}");
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("aorAAAA"));
    }

    #[test]
    fn client_secret_is_redacted_in_display() {
        let secret = Secret::new(String::from("eyJraWQiOiJrZXkt"));
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn expose_returns_inner_value() {
        let token: Secret<String> = String::from("rt_1").into();
        assert_eq!(token.expose(), "rt_1");
        let copy = token.clone();
        assert_eq!(copy.expose(), "rt_1");
    }
}
