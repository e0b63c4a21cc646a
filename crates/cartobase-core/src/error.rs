use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartobaseError {
    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid table name '{0}': only letters, digits and underscore are allowed")]
    InvalidTableName(String),

    #[error("required command '{0}' not found on PATH")]
    CommandMissing(String),

    #[error("failed to spawn '{tool}': {detail}")]
    ToolSpawn { tool: String, detail: String },

    #[error("'{tool}' exited with {status}: {detail}")]
    ToolFailed {
        tool: String,
        status: i32,
        detail: String,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("download of {url} failed: {detail}")]
    Download { url: String, detail: String },

    #[error("archive error in {path}: {detail}")]
    Archive { path: String, detail: String },

    #[error("feed '{feed}' is malformed: {detail}")]
    Feed { feed: String, detail: String },

    #[error("task '{task}' failed: {detail}")]
    Task { task: String, detail: String },

    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CartobaseError>;
