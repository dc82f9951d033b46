// The MIT License (MIT)
// Copyright © 2021 Aukbit Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use thiserror::Error;

/// Substake specific error messages
#[derive(Error, Debug)]
pub enum SubstakeError {
    #[error("Cache error: {0}")]
    CacheError(#[from] CacheError),
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Malformed data: {0}")]
    MalformedData(String),
    #[error("SerdeError error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("IOError error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Convert &str to SubstakeError
impl From<&str> for SubstakeError {
    fn from(error: &str) -> Self {
        SubstakeError::Other(error.into())
    }
}

/// Convert SubstakeError to String
impl From<SubstakeError> for String {
    fn from(error: SubstakeError) -> Self {
        format!("{}", error).to_string()
    }
}

/// Cache specific error messages
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Error reading cache snapshot: {0}")]
    SnapshotReadError(std::io::Error),
    #[error("Error writing cache snapshot: {0}")]
    SnapshotWriteError(std::io::Error),
    #[error("Error serializing cache snapshot: {0}")]
    SnapshotSerdeError(#[from] serde_json::Error),
}

/// Convert CacheError to String
impl From<CacheError> for String {
    fn from(error: CacheError) -> Self {
        format!("{}", error).to_string()
    }
}
