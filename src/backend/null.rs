use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;

use super::{AccessOptions, Backend, BackendClass, BackendFactory};
use crate::locale::Locale;
use crate::model::RecordRef;
use crate::Result;

/// Stores nothing: reads are always nil, writes return their value
#[derive(Debug)]
pub struct Null;

impl BackendFactory for Null {
    fn name(&self) -> &str {
        "null"
    }

    fn build(&self, _class: &Arc<BackendClass>, _record: RecordRef, _attribute: &str) -> Rc<dyn Backend> {
        Rc::new(NullBackend)
    }
}

#[derive(Debug)]
struct NullBackend;

impl Backend for NullBackend {
    fn read(&self, _locale: &Locale, _options: &AccessOptions) -> Result<Option<Value>> {
        Ok(None)
    }

    fn write(
        &self,
        _locale: &Locale,
        value: Option<Value>,
        _options: &AccessOptions,
    ) -> Result<Option<Value>> {
        Ok(value)
    }
}
