use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::stream::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wsh_protocol::CommandDeclaration;
use wsh_protocol::CommandType;
use wsh_protocol::ErrorKind;
use wsh_protocol::RpcContext;

/// What a registered method produces, recoded back to wire `Value`s.
pub enum Invocation {
    Call(BoxFuture<'static, Result<Value, String>>),
    Stream(BoxStream<'static, Result<Value, String>>),
}

type CallFn = Arc<
    dyn Fn(RpcContext, Value, CancellationToken) -> BoxFuture<'static, Result<Value, String>>
        + Send
        + Sync,
>;

type StreamFn = Arc<
    dyn Fn(RpcContext, Value, CancellationToken) -> BoxStream<'static, Result<Value, String>>
        + Send
        + Sync,
>;

enum Entry {
    Call(CallFn),
    Stream(StreamFn),
}

/// Maps command names to registered handler methods, built once at startup.
///
/// Stands in for the reflection step the spec describes ("enumerate the
/// server's `*Command` methods"): each registration recodes `data` into the
/// method's declared input type by round-tripping through [`serde_json`],
/// exactly as the generated dispatcher would, and recodes the method's
/// output back into a wire [`Value`].
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<&'static str, Entry>,
    declarations: HashMap<&'static str, CommandDeclaration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_call<F, Fut, In, Out>(&mut self, decl: CommandDeclaration, handler: F)
    where
        F: Fn(RpcContext, In, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, String>> + Send + 'static,
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + 'static,
    {
        assert_eq!(decl.command_type, CommandType::Call);
        let handler = Arc::new(handler);
        let wrapped: CallFn = Arc::new(move |ctx, data, cancel| -> BoxFuture<'static, Result<Value, String>> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let input: In = serde_json::from_value(data)
                    .map_err(|err| ErrorKind::Decode.format(&err.to_string()))?;
                let out = handler(ctx, input, cancel).await?;
                serde_json::to_value(out).map_err(|err| ErrorKind::Decode.format(&err.to_string()))
            })
        });
        self.entries.insert(decl.command, Entry::Call(wrapped));
        self.declarations.insert(decl.command, decl);
    }

    pub fn register_stream<F, S, In, Out>(&mut self, decl: CommandDeclaration, handler: F)
    where
        F: Fn(RpcContext, In, CancellationToken) -> S + Send + Sync + 'static,
        S: futures::Stream<Item = Result<Out, String>> + Send + 'static,
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + 'static,
    {
        assert_eq!(decl.command_type, CommandType::ResponseStream);
        let handler = Arc::new(handler);
        let wrapped: StreamFn = Arc::new(move |ctx, data, cancel| -> BoxStream<'static, Result<Value, String>> {
            let handler = Arc::clone(&handler);
            match serde_json::from_value::<In>(data) {
                Ok(input) => {
                    let stream = handler(ctx, input, cancel).map(|item| {
                        item.and_then(|out| {
                            serde_json::to_value(out)
                                .map_err(|err| ErrorKind::Decode.format(&err.to_string()))
                        })
                    });
                    Box::pin(stream)
                }
                Err(err) => {
                    let msg = ErrorKind::Decode.format(&err.to_string());
                    Box::pin(futures::stream::once(async move { Err(msg) }))
                }
            }
        });
        self.entries.insert(decl.command, Entry::Stream(wrapped));
        self.declarations.insert(decl.command, decl);
    }

    pub fn command_type(&self, command: &str) -> Option<CommandType> {
        self.declarations.get(command).map(|d| d.command_type)
    }

    pub fn invoke(
        &self,
        command: &str,
        ctx: RpcContext,
        data: Value,
        cancel: CancellationToken,
    ) -> Option<Invocation> {
        match self.entries.get(command)? {
            Entry::Call(f) => Some(Invocation::Call(f(ctx, data, cancel))),
            Entry::Stream(f) => Some(Invocation::Stream(f(ctx, data, cancel))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn dispatches_a_registered_call() {
        let mut registry = HandlerRegistry::new();
        registry.register_call(
            CommandDeclaration::call("echo", "EchoCommand"),
            |_ctx, input: String, _cancel| async move { Ok(input) },
        );

        let invocation = registry
            .invoke(
                "echo",
                RpcContext::for_leaf("conn:1"),
                Value::from("hi"),
                CancellationToken::new(),
            )
            .unwrap();
        let Invocation::Call(fut) = invocation else {
            panic!("expected a call invocation");
        };
        assert_eq!(fut.await, Ok(Value::from("hi")));
    }

    #[tokio::test]
    async fn decode_failure_becomes_a_decode_error() {
        let mut registry = HandlerRegistry::new();
        registry.register_call(
            CommandDeclaration::call("echo", "EchoCommand"),
            |_ctx, _input: u64, _cancel| async move { Ok(()) },
        );

        let invocation = registry
            .invoke(
                "echo",
                RpcContext::for_leaf("conn:1"),
                Value::from("not a number"),
                CancellationToken::new(),
            )
            .unwrap();
        let Invocation::Call(fut) = invocation else {
            panic!("expected a call invocation");
        };
        assert!(fut.await.unwrap_err().starts_with("decode error"));
    }

    #[tokio::test]
    async fn dispatches_a_registered_stream() {
        let mut registry = HandlerRegistry::new();
        registry.register_stream(
            CommandDeclaration::response_stream("count", "CountCommand"),
            |_ctx, n: u64, _cancel| futures::stream::iter((0..n).map(Ok)),
        );

        let invocation = registry
            .invoke(
                "count",
                RpcContext::for_leaf("conn:1"),
                Value::from(3),
                CancellationToken::new(),
            )
            .unwrap();
        let Invocation::Stream(stream) = invocation else {
            panic!("expected a stream invocation");
        };
        let items: Vec<_> = stream.collect().await;
        assert_eq!(
            items,
            vec![Ok(Value::from(0)), Ok(Value::from(1)), Ok(Value::from(2))]
        );
    }
}
