use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Yaml(serde_yaml::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    HttpHeader(hyper::http::Error),

    #[from]
    Io(std::io::Error),

    #[from]
    Transport(reqwest::Error),

    /// Configuration failed schema or semantic validation
    ConfigValidation(String),

    /// Resource kind not in the recognized set
    UnknownKind(String),

    /// Predicate string failed to compile
    BadExpression(String),

    /// Predicate evaluation failed against a concrete event
    Eval(String),

    /// Webhook endpoint replied with a non-2xx status
    Sink(u16),

    /// Template string failed to compile
    TemplateRender(String),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
