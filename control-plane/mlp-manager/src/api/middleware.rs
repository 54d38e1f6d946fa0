use std::time::Duration;
use tower::ServiceBuilder;
use tower::layer::util::{Identity, Stack};
use tower_http::{
    classify::ServerErrorsAsFailures, classify::SharedClassifier,
    cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

pub type MiddlewareStack = ServiceBuilder<
    Stack<
        TimeoutLayer,
        Stack<
            CorsLayer,
            Stack<TraceLayer<SharedClassifier<ServerErrorsAsFailures>>, Identity>,
        >,
    >,
>;

/// Tracing, permissive CORS and a whole-request deadline.
pub fn create_middleware_stack(request_timeout: Duration) -> MiddlewareStack {
    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(request_timeout))
}
