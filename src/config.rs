//! Carga de configuración: valores por defecto del entorno y credenciales de sesión.

use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Valores leídos del entorno al arrancar. Solo sirven para pre-rellenar el
/// formulario del navegador; la sesión real se construye con lo que el
/// usuario envíe en "Guardar y conectar".
#[derive(Clone, Debug, Serialize)]
pub struct EnvDefaults {
    pub gemini_api_key: String,
    pub neo4j_uri: String,
    pub neo4j_username: String,
    pub neo4j_password: String,
    pub neo4j_database: String,
    #[serde(skip)]
    pub server_addr: String,
}

impl EnvDefaults {
    /// Carga los valores por defecto (usando .env si existe). Nunca falla:
    /// un entorno vacío simplemente deja el formulario en blanco.
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            neo4j_uri: env::var("NEO4J_URI").unwrap_or_default(),
            neo4j_username: env::var("NEO4J_USERNAME").unwrap_or_default(),
            neo4j_password: env::var("NEO4J_PASSWORD").unwrap_or_default(),
            neo4j_database: env::var("NEO4J_DATABASE")
                .unwrap_or_else(|_| "neo4j".to_string()),
            server_addr: env::var("SERVER_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3322".to_string()),
        }
    }
}

/// Credenciales enviadas por el formulario. Se sobrescriben en cada
/// reconfiguración y nunca se persisten a disco.
#[derive(Clone, Debug, Deserialize)]
pub struct SessionCredentials {
    pub gemini_api_key: String,
    pub neo4j_uri: String,
    pub neo4j_username: String,
    pub neo4j_password: String,
    pub neo4j_database: String,
}

impl SessionCredentials {
    /// Comprueba que los cinco campos vienen rellenos. No intenta ninguna
    /// conexión: solo nombra los campos que faltan.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.gemini_api_key.trim().is_empty() {
            missing.push("clave API de Gemini");
        }
        if self.neo4j_uri.trim().is_empty() {
            missing.push("URI de Neo4j");
        }
        if self.neo4j_username.trim().is_empty() {
            missing.push("usuario de Neo4j");
        }
        if self.neo4j_password.trim().is_empty() {
            missing.push("contraseña de Neo4j");
        }
        if self.neo4j_database.trim().is_empty() {
            missing.push("base de datos de Neo4j");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Faltan campos: {}", missing.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> SessionCredentials {
        SessionCredentials {
            gemini_api_key: "key".into(),
            neo4j_uri: "neo4j+s://demo.databases.neo4j.io".into(),
            neo4j_username: "neo4j".into(),
            neo4j_password: "secret".into(),
            neo4j_database: "neo4j".into(),
        }
    }

    #[test]
    fn credenciales_completas_validan() {
        assert!(full().validate().is_ok());
    }

    #[test]
    fn campo_vacio_se_nombra_en_el_error() {
        let mut creds = full();
        creds.gemini_api_key = String::new();
        let err = creds.validate().unwrap_err().to_string();
        assert!(err.contains("clave API de Gemini"));
    }

    #[test]
    fn espacios_cuentan_como_vacio() {
        let mut creds = full();
        creds.neo4j_password = "   ".into();
        assert!(creds.validate().is_err());
    }

    #[test]
    fn varios_campos_vacios_se_listan_todos() {
        let mut creds = full();
        creds.neo4j_uri = String::new();
        creds.neo4j_database = String::new();
        let err = creds.validate().unwrap_err().to_string();
        assert!(err.contains("URI de Neo4j"));
        assert!(err.contains("base de datos de Neo4j"));
    }
}
