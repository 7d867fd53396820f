//! Message router: maps decoded message types to the module that handles them.
//!
//! A routed message is sent fire-and-forget to its server under
//! `FunctionId::of::<M>()`, with arguments `(message, sender)`.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::args;
use crate::chanrpc::{Args, ServerRef, Value};
use crate::types::{Error, FunctionId, Result};

#[derive(Debug, Default)]
pub struct MessageRouter {
    routes: HashMap<TypeId, (FunctionId, ServerRef)>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages of type `M` to `server`.
    pub fn set_route<M: Any + Send>(&mut self, server: ServerRef) -> Result<()> {
        let id = FunctionId::of::<M>();
        if self.routes.contains_key(&TypeId::of::<M>()) {
            return Err(Error::AlreadyRegistered(id));
        }
        tracing::debug!(message = %id, "route_registered");
        self.routes.insert(TypeId::of::<M>(), (id, server));
        Ok(())
    }

    pub fn has_route<M: Any>(&self) -> bool {
        self.routes.contains_key(&TypeId::of::<M>())
    }

    /// Dispatch `msg` with its `sender` context. Waits for queue space.
    pub async fn route<M, S>(&self, msg: M, sender: S) -> Result<()>
    where
        M: Any + Send,
        S: Any + Send,
    {
        let (id, server) = self
            .routes
            .get(&TypeId::of::<M>())
            .ok_or_else(|| Error::NotRegistered(FunctionId::of::<M>()))?;
        server.send(id.clone(), args![msg, sender]).await
    }

    /// Dispatch an already boxed message, keyed by its runtime type.
    pub async fn route_value<S: Any + Send>(&self, msg: Value, sender: S) -> Result<()> {
        let type_id = (*msg).type_id();
        let Some((id, server)) = self.routes.get(&type_id) else {
            return Err(Error::NotRegistered(FunctionId::Name("<unrouted message>".into())));
        };
        let args = Args::from(vec![msg, Box::new(sender) as Value]);
        server.send(id.clone(), args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chanrpc::{Handler, Server};
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Hello {
        name: String,
    }

    #[derive(Debug)]
    struct Agent(u32);

    fn game_server(seen: &Arc<Mutex<Vec<(String, u32)>>>) -> Server {
        let mut server = Server::new(8);
        let sink = Arc::clone(seen);
        server
            .register(
                FunctionId::of::<Hello>(),
                Handler::no_return(move |mut args: Args| {
                    let hello = args.take::<Hello>(0)?;
                    let agent = args.take::<Agent>(1)?;
                    sink.lock().unwrap().push((hello.name, agent.0));
                    Ok(())
                }),
            )
            .unwrap();
        server
    }

    #[tokio::test]
    async fn test_route_delivers_message_and_sender() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut server = game_server(&seen);
        let mut router = MessageRouter::new();
        router.set_route::<Hello>(server.handle()).unwrap();

        router
            .route(Hello { name: "alice".into() }, Agent(7))
            .await
            .unwrap();
        router
            .route_value(Box::new(Hello { name: "boxed".into() }), Agent(8))
            .await
            .unwrap();

        for _ in 0..2 {
            let call = server.next_call().await.unwrap();
            assert!(call.is_oneway());
            server.exec(call).await;
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("alice".to_string(), 7), ("boxed".to_string(), 8)]
        );
    }

    #[tokio::test]
    async fn test_unknown_message_type() {
        let router = MessageRouter::new();
        let err = router.route(Hello { name: "x".into() }, Agent(1)).await.unwrap_err();
        assert!(matches!(err, Error::NotRegistered(FunctionId::Type { .. })));
    }

    #[test]
    fn test_duplicate_route() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let server = game_server(&seen);
        let mut router = MessageRouter::new();
        router.set_route::<Hello>(server.handle()).unwrap();
        let err = router.set_route::<Hello>(server.handle()).unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
        assert!(router.has_route::<Hello>());
    }
}
