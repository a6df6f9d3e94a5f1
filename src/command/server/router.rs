use hyper::{Method, Uri};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Login,
    Healthz,
    Metrics,
    Unknown,
}

impl Route {
    pub fn action_name(self) -> &'static str {
        match self {
            Route::Login => "login",
            Route::Healthz => "healthz",
            Route::Metrics => "metrics",
            Route::Unknown => "unknown",
        }
    }
}

pub fn parse(method: &Method, uri: &Uri, login_path: &str) -> Route {
    if method != Method::GET {
        return Route::Unknown;
    }

    match uri.path() {
        "/healthz" => Route::Healthz,
        "/metrics" => Route::Metrics,
        path if path == login_path => Route::Login,
        _ => Route::Unknown,
    }
}
