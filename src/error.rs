// Copyright (c) 2023 Beihang University, Huawei Technologies Co.,Ltd. All rights reserved.
// Rust-Shyper is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//          http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND,
// EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT,
// MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! Defines the error type for the processing system.

use core::fmt;
use core::result::Result as CoreResult;
use std::error::Error as StdError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    Library,
    /// A count or index in the configuration is outside what the hardware supports.
    InvalidParam,
    /// The configuration is inconsistent with the collaborators handed to the constructor.
    InvalidConfig,
}

type DynError = dyn StdError + Send + Sync;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: Option<Box<DynError>>,
}

pub type Result<T> = CoreResult<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> CoreResult<(), fmt::Error> {
        match &self.inner {
            Some(inner) => write!(f, "{:?}: {}", self.kind, inner),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl Error {
    pub fn new(kind: ErrorKind, inner: Box<DynError>) -> Self {
        Self {
            kind,
            inner: Some(inner),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn into_inner(self) -> Option<Box<DynError>> {
        self.inner
    }
}

impl ErrorKind {
    pub fn wrap(self, inner: Box<DynError>) -> Error {
        Error::new(self, inner)
    }

    /// Build an error of this kind carrying a descriptive message.
    pub fn msg<S: Into<String>>(self, msg: S) -> Error {
        Error::new(self, msg.into().into())
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, inner: None }
    }
}

impl<T> From<ErrorKind> for Result<T> {
    fn from(val: ErrorKind) -> Self {
        Err(val.into())
    }
}

impl<T: StdError + Send + Sync + 'static> From<T> for Error {
    fn from(e: T) -> Self {
        ErrorKind::Library.wrap(Box::new(e))
    }
}
