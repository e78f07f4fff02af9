/// Declares a method marker type.
///
/// ```ignore
/// rpc_method!(pub SayHello(HelloRequest) -> HelloReply);
/// ```
#[macro_export]
macro_rules! rpc_method {
    ($(#[$meta:meta])* $vis:vis $name:ident($request:ty) -> $response:ty) => {
        $(#[$meta])*
        $vis struct $name;

        impl $crate::RpcMethod for $name {
            const NAME: &'static str = stringify!($name);
            type Request = $request;
            type Response = $response;
        }
    };
}

/// Declares the closed set of client calls a [`Client`](crate::Client)
/// completes, one variant per method.
///
/// ```ignore
/// client_calls! {
///     pub enum GreeterReply {
///         SayHello(SayHello),
///         SayHi(SayHi),
///     }
/// }
/// ```
#[macro_export]
macro_rules! client_calls {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident($method:ty)),+ $(,)? }) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($crate::ClientCall<$method>),)+
        }

        $(
            impl ::core::convert::From<$crate::ClientCall<$method>> for $name {
                fn from(call: $crate::ClientCall<$method>) -> Self {
                    Self::$variant(call)
                }
            }
        )+
    };
}

/// Declares the closed set of server calls a [`ServerHost`](crate::ServerHost)
/// dispatches, and wires every method to the service's
/// [`MethodHandler`](crate::MethodHandler) impl.
///
/// ```ignore
/// server_calls! {
///     pub enum GreeterCall for Greeter {
///         SayHello(SayHello),
///         SayHi(SayHi),
///     }
/// }
/// ```
#[macro_export]
macro_rules! server_calls {
    ($(#[$meta:meta])* $vis:vis enum $name:ident for $service:ty { $($variant:ident($method:ty)),+ $(,)? }) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($crate::ServerCall<$method>),)+
        }

        $(
            impl ::core::convert::From<$crate::ServerCall<$method>> for $name {
                fn from(call: $crate::ServerCall<$method>) -> Self {
                    Self::$variant(call)
                }
            }
        )+

        impl $crate::ServerCalls for $name {
            type Service = $service;

            fn ready(host: &$crate::HostHandle<Self>) -> $crate::Result<()> {
                $(host.accept::<$method>()?;)+
                Ok(())
            }

            fn process(self, service: &Self::Service, host: &$crate::HostHandle<Self>) {
                match self {
                    $(Self::$variant(call) => call.advance(service, host),)+
                }
            }
        }
    };
}
