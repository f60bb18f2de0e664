use std::fmt::Display;

#[derive(Debug)]
pub enum ZError {
    FileError(std::io::Error),
    HttpError(reqwest::Error),
    HttpStatus(reqwest::StatusCode, String),
    MatError(String),
    ShapeError(String),
    Message(String),
}

impl Display for ZError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ZError::FileError(ref err) => std::fmt::Display::fmt(&err, f),
            ZError::HttpError(ref err) => std::fmt::Display::fmt(&err, f),
            ZError::HttpStatus(ref status, ref url) => {
                write!(f, "http status {} for {}", status, url)
            }
            ZError::MatError(ref err) => write!(f, "mat parse: {}", err),
            ZError::ShapeError(ref err) => write!(f, "shape: {}", err),
            ZError::Message(ref err) => std::fmt::Display::fmt(&err, f),
        }
    }
}

impl std::error::Error for ZError {}

impl From<std::io::Error> for ZError {
    fn from(err: std::io::Error) -> ZError {
        ZError::FileError(err)
    }
}

impl From<reqwest::Error> for ZError {
    fn from(err: reqwest::Error) -> ZError {
        ZError::HttpError(err)
    }
}

impl From<String> for ZError {
    fn from(err: String) -> ZError {
        ZError::Message(err)
    }
}

pub type Result<T> = std::result::Result<T, ZError>;
