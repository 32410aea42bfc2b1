//! Precache manifest
//!
//! The fixed list of resources stored at install time. Paths are relative to
//! the worker scope; changing this list must go together with a version bump.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, ConfigResult};

/// Resources of the deployed dashboard: shell, chart pages (desktop and mobile) and icons.
const DASHBOARD_RESOURCES: &[&str] = &[
    "index.html",
    "manifest.json",
    "css/style.css",
    "serviceWorker.js",
    "app.js",
    "graficos/plotly.min.js",
    "graficos/anhembi-mobile.html",
    "graficos/anhembi.html",
    "graficos/casos-cidade-mobile.html",
    "graficos/casos-cidade.html",
    "graficos/casos-estado-mobile.html",
    "graficos/casos-estado.html",
    "graficos/isolamento-mobile.html",
    "graficos/isolamento.html",
    "graficos/leitos-municipais-mobile.html",
    "graficos/leitos-municipais.html",
    "graficos/leitos-estaduais-mobile.html",
    "graficos/leitos-estaduais.html",
    "graficos/pacaembu-mobile.html",
    "graficos/pacaembu.html",
    "graficos/resumo-mobile.html",
    "graficos/resumo.html",
    "graficos/resumo-vacinacao-mobile.html",
    "graficos/resumo-vacinacao.html",
    "graficos/tabela-isolamento-mobile.html",
    "graficos/tabela-isolamento.html",
    "graficos/evolucao-estado.html",
    "graficos/evolucao-estado-mobile.html",
    "graficos/evolucao-cidade.html",
    "graficos/evolucao-cidade-mobile.html",
    "graficos/resumo-semanal-mobile.html",
    "graficos/resumo-semanal.html",
    "graficos/leitos-municipais-privados-mobile.html",
    "graficos/leitos-municipais-privados.html",
    "graficos/leitos-municipais-total-mobile.html",
    "graficos/leitos-municipais-total.html",
    "graficos/drs-mobile.html",
    "graficos/drs.html",
    "graficos/doencas-casos-mobile.html",
    "graficos/doencas-casos.html",
    "graficos/doencas-obitos-mobile.html",
    "graficos/doencas-obitos.html",
    "graficos/vacinacao-estado-mobile.html",
    "graficos/vacinacao-estado.html",
    "graficos/vacinacao-cidade-mobile.html",
    "graficos/vacinacao-cidade.html",
    "graficos/populacao-vacinada-mobile.html",
    "graficos/populacao-vacinada.html",
    "graficos/vacinas-aplicadas-mobile.html",
    "graficos/vacinas-aplicadas.html",
    "graficos/vacinas-tipo-mobile.html",
    "graficos/vacinas-tipo.html",
    "graficos/tabela_vacinacao.html",
    "graficos/tabela-vacinacao-mobile.html",
    "images/bg01.png",
    "icons/android-chrome-192x192.png",
    "icons/android-chrome-512x512.png",
    "icons/apple-touch-icon.png",
    "icons/favicon-16x16.png",
    "icons/favicon-32x32.png",
    "icons/favicon.ico",
];

/// Ordered sequence of relative resource paths to precache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

impl Manifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that every entry is a non-empty relative path and that no entry repeats.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::with_capacity(self.0.len());
        for path in &self.0 {
            if path.trim().is_empty() {
                return Err(ConfigError::manifest("empty path"));
            }
            if Url::parse(path).is_ok() {
                return Err(ConfigError::manifest(format!(
                    "'{path}' is an absolute URL, expected a path relative to the scope"
                )));
            }
            // Also covers protocol-relative `//host/...`; the URL parser reads `\` as `/`.
            if path.starts_with(['/', '\\']) {
                return Err(ConfigError::manifest(format!(
                    "'{path}' starts at the root, expected a path relative to the scope"
                )));
            }
            if !seen.insert(path.as_str()) {
                return Err(ConfigError::manifest(format!("duplicate entry '{path}'")));
            }
        }
        Ok(())
    }

    /// Resolve every path against the worker scope, keeping manifest order.
    ///
    /// Every resolved URL must share the scope's origin.
    pub fn resolve(&self, scope: &Url) -> ConfigResult<Vec<Url>> {
        self.validate()?;
        self.0
            .iter()
            .map(|path| {
                let url = scope
                    .join(path)
                    .map_err(|e| ConfigError::manifest(format!("'{path}': {e}")))?;
                if url.origin() != scope.origin() {
                    return Err(ConfigError::manifest(format!(
                        "'{path}' resolves to {url}, outside the origin of {scope}"
                    )));
                }
                Ok(url)
            })
            .collect()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(DASHBOARD_RESOURCES.iter().copied())
    }
}
