//! Message values and identity tokens carried through a loop.

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Opaque key compared by identity. Clones share the same identity.
#[derive(Clone)]
pub struct Token(Arc<()>);

impl Token {
    pub fn new() -> Self {
        Self(Arc::new(()))
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Token {}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({:p})", Arc::as_ptr(&self.0))
    }
}

/// Identifier-plus-payload value delivered to a message handler.
///
/// `obj` scopes removal and lookup (`remove_messages_with_object`);
/// `payload` is passed through untouched.
#[derive(Clone, Default)]
pub struct Message {
    pub what: i32,
    pub arg1: i32,
    pub arg2: i32,
    pub obj: Option<Token>,
    pub payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Message {
    pub fn new(what: i32) -> Self {
        Self {
            what,
            ..Self::default()
        }
    }

    pub fn with_args(mut self, arg1: i32, arg2: i32) -> Self {
        self.arg1 = arg1;
        self.arg2 = arg2;
        self
    }

    pub fn with_obj(mut self, obj: Token) -> Self {
        self.obj = Some(obj);
        self
    }

    pub fn with_payload<T>(mut self, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Borrows the payload as `T` when it has that type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("what", &self.what)
            .field("arg1", &self.arg1)
            .field("arg2", &self.arg2)
            .field("obj", &self.obj)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, Token};

    #[test]
    fn tokens_compare_by_identity() {
        let token = Token::new();
        assert_eq!(token, token.clone());
        assert_ne!(token, Token::new());
    }

    #[test]
    fn payload_downcasts_to_original_type() {
        let message = Message::new(7).with_args(1, 2).with_payload("ready".to_string());
        assert_eq!(message.what, 7);
        assert_eq!(message.arg2, 2);
        assert_eq!(message.payload_as::<String>().map(String::as_str), Some("ready"));
        assert!(message.payload_as::<u32>().is_none());
    }
}
