//! NAPI bindings for the host bundler.
//!
//! `NativesPlugin` wraps one [`NativesEngine`] for the lifetime of a build.
//! The JS side maps each bundler hook onto one method.

use napi::bindgen_prelude::*;
use napi_derive::napi;

use crate::config::NativesOptions;
use crate::engine::NativesEngine;
use crate::error::NativesError;

fn to_napi(e: NativesError) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

#[napi(object)]
pub struct TransformResult {
    pub code: String,
    /// JSON-serialized decoded source map
    pub map: Option<String>,
}

#[napi(object)]
pub struct ExternalId {
    pub id: String,
    pub external: bool,
}

#[napi(object)]
pub struct DynamicImportRender {
    pub left: String,
    pub right: String,
}

#[napi]
pub struct NativesPlugin {
    engine: NativesEngine,
}

#[napi]
impl NativesPlugin {
    #[napi(constructor)]
    pub fn new(options: Option<serde_json::Value>) -> Result<Self> {
        crate::init_tracing();
        let options = match options {
            Some(value) => NativesOptions::from_value(value).map_err(to_napi)?,
            None => NativesOptions::default(),
        };
        Ok(NativesPlugin {
            engine: NativesEngine::new(options),
        })
    }

    #[napi]
    pub fn build_start(&self) -> Result<()> {
        self.engine.build_start().map_err(to_napi)
    }

    #[napi]
    pub fn resolve_id(&self, importee: String, importer: Option<String>) -> Result<Option<String>> {
        self.engine
            .resolve_id(&importee, importer.as_deref())
            .map_err(to_napi)
    }

    #[napi]
    pub fn transform(&self, code: String, id: String) -> Result<Option<TransformResult>> {
        let Some(output) = self.engine.rewrite(&code, &id).map_err(to_napi)? else {
            return Ok(None);
        };
        let map = match output.map {
            Some(map) => Some(
                serde_json::to_string(&map).map_err(|e| napi::Error::from_reason(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Some(TransformResult {
            code: output.code,
            map,
        }))
    }

    #[napi]
    pub fn resolve_dynamic_import(&self, id: String) -> Option<ExternalId> {
        self.engine
            .resolve_dynamic_import(&id)
            .map(|reference| ExternalId {
                id: reference.id,
                external: reference.external,
            })
    }

    #[napi]
    pub fn output_intro(&self, format: Option<String>) -> Option<String> {
        self.engine
            .output_intro(format.as_deref())
            .map(str::to_string)
    }

    #[napi]
    pub fn render_dynamic_import(&self) -> DynamicImportRender {
        let syntax = self.engine.render_dynamic_import();
        DynamicImportRender {
            left: syntax.left.to_string(),
            right: syntax.right.to_string(),
        }
    }

    /// Warnings to forward to the bundler's `this.warn`.
    #[napi]
    pub fn take_warnings(&self) -> Vec<String> {
        self.engine.take_warnings()
    }
}
