//! Estado compartido del servidor: la sesión activa, el estado visible en la
//! interfaz y el canal de apagado.

use std::sync::{Arc, Mutex};

use neo4rs::Graph;
use tokio::sync::oneshot;

use crate::{
    config::EnvDefaults,
    llm::{GeminiChat, GeminiEmbeddings},
    qa::CypherQaChain,
};

#[derive(Clone)]
pub struct AppState {
    pub defaults: EnvDefaults,
    pub session: Arc<Mutex<Option<Session>>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Estado recién arrancado: sin sesión, sin procesado en marcha y con el
    /// mensaje de bienvenida que ve el navegador. El canal de apagado se
    /// engancha después, cuando `main` lo crea.
    pub fn new(defaults: EnvDefaults) -> Self {
        Self {
            defaults,
            session: Arc::new(Mutex::new(None)),
            status: Arc::new(Mutex::new(Status {
                message: "Servidor listo. Guarde la configuración para empezar.".to_string(),
                ..Status::default()
            })),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Fase actual, derivada solo del contenido de la sesión.
    pub fn phase(&self) -> Phase {
        match self.session.lock().unwrap().as_ref() {
            None => Phase::Unconfigured,
            Some(session) if session.qa.is_none() => Phase::Configured,
            Some(_) => Phase::Processed,
        }
    }

    /// Copia de la sesión activa. El mutex se suelta antes de volver, así
    /// que nunca se retiene a través de un await.
    pub fn session_snapshot(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }
}

/// Clientes construidos con las credenciales del formulario. Solo existe
/// después de un «guardar y conectar» que llegó a la base de datos.
#[derive(Clone)]
pub struct Session {
    pub chat: GeminiChat,
    pub embeddings: GeminiEmbeddings,
    pub graph: Arc<Graph>,
    /// Se rellena al terminar con éxito el procesado de un PDF.
    pub qa: Option<CypherQaChain>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unconfigured,
    Configured,
    Processed,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32,
    /// Nombre del último PDF procesado con éxito.
    pub document: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn un_estado_nuevo_esta_sin_configurar() {
        let state = AppState::new(EnvDefaults::from_env());
        assert_eq!(state.phase(), Phase::Unconfigured);
        assert!(state.session_snapshot().is_none());

        let status = state.status.lock().unwrap();
        assert!(!status.is_busy);
        assert!(status.message.contains("Guarde la configuración"));
    }

    #[test]
    fn las_fases_se_serializan_en_snake_case() {
        assert_eq!(serde_json::to_value(Phase::Unconfigured).unwrap(), "unconfigured");
        assert_eq!(serde_json::to_value(Phase::Configured).unwrap(), "configured");
        assert_eq!(serde_json::to_value(Phase::Processed).unwrap(), "processed");
    }

    #[test]
    fn el_estado_inicial_no_esta_ocupado() {
        let status = Status::default();
        assert!(!status.is_busy);
        assert!(status.document.is_none());
    }
}
