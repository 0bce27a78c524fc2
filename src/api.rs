//! Superficie HTTP de la aplicación: configuración de sesión, subida y
//! procesado del PDF, preguntas sobre el grafo y utilidades para la interfaz.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use neo4rs::{query, Node, Relation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Phase, Session, Status},
    config::{EnvDefaults, SessionCredentials},
    ingest::{self, ProcessingSummary},
    llm::{GeminiChat, GeminiEmbeddings},
    models::ALLOWED_NODE_LABELS,
    neo4j_client,
    qa::QaOutcome,
};

/// Límite de subida holgado para informes médicos escaneados.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct TestLlmPayload {
    prompt: String,
}

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    phase: Phase,
    #[serde(flatten)]
    status: Status,
}

#[derive(Serialize, Deserialize)]
pub struct EntityInfo {
    id: String,
    label: String,
}

#[derive(Serialize, Clone)]
pub struct GraphNode {
    id: String,
    label: String,
    group: String,
}

#[derive(Serialize)]
pub struct GraphEdge {
    source: String,
    target: String,
    label: String,
}

#[derive(Serialize)]
pub struct GraphData {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/defaults", get(defaults_handler))
        .route("/api/config", post(save_config_handler))
        .route("/api/test-llm", post(test_llm_handler))
        .route("/api/process", post(process_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/entities", get(list_entities_handler))
        .route("/api/graph-data", get(graph_data_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

// --- Acciones exclusivas ---

/// Reserva del indicador de ocupado. Se libera en `Drop`, de modo que el
/// indicador vuelve a estar libre aunque el cliente corte la conexión y axum
/// descarte el futuro del handler a mitad de la acción.
struct BusyGuard {
    status: Arc<Mutex<Status>>,
}

impl BusyGuard {
    /// Reclama la sesión para una acción exclusiva. Devuelve `None` si ya
    /// hay otra acción en marcha.
    fn acquire(status: &Arc<Mutex<Status>>) -> Option<BusyGuard> {
        let mut current = status.lock().unwrap();
        if current.is_busy {
            return None;
        }
        current.is_busy = true;
        current.progress = 0.0;
        drop(current);
        Some(BusyGuard { status: status.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut status = self.status.lock().unwrap();
        status.is_busy = false;
        status.progress = 0.0;
    }
}

// --- Handlers ---

/// Valores del entorno con los que el navegador pre-rellena el formulario.
#[axum::debug_handler]
async fn defaults_handler(State(state): State<AppState>) -> Json<EnvDefaults> {
    Json(state.defaults.clone())
}

#[axum::debug_handler]
async fn save_config_handler(
    State(state): State<AppState>,
    Json(credentials): Json<SessionCredentials>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if let Err(e) = credentials.validate() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))));
    }

    // Cambiar de sesión en mitad de un procesado dejaría la cadena de
    // preguntas emparejada con el grafo equivocado, así que configurar
    // también es una acción exclusiva.
    let Some(_busy) = BusyGuard::acquire(&state.status) else {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "Espere a que termine el procesado en curso."})),
        ));
    };
    state.status.lock().unwrap().message = "Comprobando la conexión con Neo4j...".to_string();

    let chat = GeminiChat::new(&credentials.gemini_api_key);
    let embeddings = GeminiEmbeddings::new(&credentials.gemini_api_key);

    // La única frontera de error con trato especial: si la conexión falla,
    // se informa y la sesión queda exactamente como estaba.
    let graph = match neo4j_client::connect(&credentials).await {
        Ok(graph) => graph,
        Err(e) => {
            error!("Fallo de conexión con Neo4j: {e:#}");
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("No se pudo conectar a Neo4j: {e}")})),
            ));
        }
    };
    if let Err(e) = neo4j_client::ensure_schema(&graph).await {
        error!("No se pudo preparar el esquema: {e:#}");
        return Err((
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": format!("No se pudo conectar a Neo4j: {e}")})),
        ));
    }

    *state.session.lock().unwrap() = Some(Session {
        chat,
        embeddings,
        graph: Arc::new(graph),
        qa: None,
    });
    {
        let mut status = state.status.lock().unwrap();
        status.message = "Conexión establecida. Ya puede subir un PDF.".to_string();
        status.document = None;
        status.progress = 0.0;
    }

    info!("Sesión configurada y conectada a Neo4j.");
    Ok(Json(json!({"message": "Configuración guardada y conexión establecida."})))
}

/// Prueba rápida del modelo: el prompt se envía tal cual, sin contexto.
#[axum::debug_handler]
async fn test_llm_handler(
    State(state): State<AppState>,
    Json(payload): Json<TestLlmPayload>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(session) = state.session_snapshot() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Guarde la configuración antes de probar el modelo."})),
        ));
    };

    match session.chat.generate(None, &payload.prompt).await {
        Ok(response) => Ok(Json(json!({"response": response}))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Error del modelo: {e}")})),
        )),
    }
}

#[axum::debug_handler]
async fn process_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    // Una sola acción a la vez: si ya hay otra en marcha se rechaza. La
    // sesión se copia con la reserva ya tomada, de forma que nadie puede
    // sustituirla mientras dura el procesado.
    let Some(_busy) = BusyGuard::acquire(&state.status) else {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "Ya hay un procesado en marcha."})),
        ));
    };
    let Some(session) = state.session_snapshot() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Guarde la configuración antes de subir un PDF."})),
        ));
    };
    state.status.lock().unwrap().message = "Recibiendo el PDF...".to_string();

    match run_processing(&state, &session, multipart).await {
        Ok(summary) => {
            let message = format!("¡Procesado completado! {summary}");
            let mut status = state.status.lock().unwrap();
            status.message = message.clone();
            status.document = Some(summary.file_name.clone());
            drop(status);
            Ok(Json(json!({"message": message, "summary": summary})))
        }
        Err(err) => {
            state.status.lock().unwrap().message = format!("Error en el procesado: {err}");
            error!("Error procesando el PDF: {err:#}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error en el procesado: {err}")})),
            ))
        }
    }
}

/// Lee el PDF de la petición y ejecuta el pipeline. La cadena de preguntas
/// se guarda en la sesión como último paso: si algo falla antes, la cadena
/// anterior (si la había) se conserva.
async fn run_processing(
    state: &AppState,
    session: &Session,
    mut multipart: Multipart,
) -> Result<ProcessingSummary> {
    let (file_name, bytes) = read_pdf_upload(&mut multipart).await?;
    info!("PDF recibido: '{file_name}' ({} bytes)", bytes.len());

    let (summary, chain) = ingest::process_document(
        &session.graph,
        &session.chat,
        &session.embeddings,
        &file_name,
        &bytes,
        state.status.clone(),
    )
    .await?;

    if let Some(active) = state.session.lock().unwrap().as_mut() {
        active.qa = Some(chain);
    }
    Ok(summary)
}

/// Las seis etiquetas médicas como lista Cypher (`'Patient', 'Disease', ...`).
fn quoted_label_list() -> String {
    ALLOWED_NODE_LABELS
        .iter()
        .map(|label| format!("'{label}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn read_pdf_upload(multipart: &mut Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("El campo 'file' no trae nombre de fichero"))?;
        let bytes = field.bytes().await?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(anyhow!("La petición no incluye ningún fichero en el campo 'file'"))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<QaOutcome>, (StatusCode, Json<serde_json::Value>)> {
    let Some(session) = state.session_snapshot() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Guarde la configuración y procese un PDF antes de preguntar."})),
        ));
    };
    let Some(qa) = session.qa else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Procese un PDF antes de hacer preguntas."})),
        ));
    };

    match qa.ask(&session.graph, &payload.question).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Error al responder la pregunta: {e}")})),
        )),
    }
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.status.lock().unwrap().clone();
    Json(StatusResponse { phase: state.phase(), status })
}

#[axum::debug_handler]
async fn list_entities_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<EntityInfo>>, (StatusCode, Json<serde_json::Value>)> {
    let Some(session) = state.session_snapshot() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Guarde la configuración antes de consultar el grafo."})),
        ));
    };

    let cypher = format!(
        "MATCH (e) WHERE any(l IN labels(e) WHERE l IN [{}])
         RETURN DISTINCT e.id AS id, labels(e)[0] AS label
         ORDER BY label, id",
        quoted_label_list()
    );
    let mut cursor = session
        .graph
        .execute(query(&cypher))
        .await
        .map_err(|e| {
            error!("Error consultando entidades: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error consultando entidades: {e}")})),
            )
        })?;

    let mut entities = Vec::new();
    while let Some(row) = cursor.next().await.map_err(|e| {
        error!("Error iterando sobre entidades: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Error consultando entidades: {e}")})),
        )
    })? {
        if let (Some(id), Some(label)) = (row.get("id"), row.get("label")) {
            entities.push(EntityInfo { id, label });
        }
    }
    Ok(Json(entities))
}

#[axum::debug_handler]
async fn graph_data_handler(
    State(state): State<AppState>,
) -> Result<Json<GraphData>, (StatusCode, Json<serde_json::Value>)> {
    let Some(session) = state.session_snapshot() else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Guarde la configuración antes de consultar el grafo."})),
        ));
    };

    let cypher = format!(
        "MATCH (e1)-[r]->(e2)
         WHERE any(l IN labels(e1) WHERE l IN [{labels}])
           AND any(l IN labels(e2) WHERE l IN [{labels}])
         RETURN e1, r, e2 LIMIT 100",
        labels = quoted_label_list()
    );
    let mut cursor = session
        .graph
        .execute(query(&cypher))
        .await
        .map_err(|e| {
            error!("Error consultando datos del grafo: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Error consultando el grafo: {e}")})),
            )
        })?;

    let mut nodes = std::collections::HashMap::new();
    let mut edges = Vec::new();

    while let Some(row) = cursor.next().await.map_err(|e| {
        error!("Error iterando sobre datos del grafo: {e}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Error consultando el grafo: {e}")})),
        )
    })? {
        if let (Some(e1_node), Some(r_rel), Some(e2_node)) =
            (row.get::<Node>("e1"), row.get::<Relation>("r"), row.get::<Node>("e2"))
        {
            let e1_id: String = e1_node.get("id").unwrap_or_default();
            let e2_id: String = e2_node.get("id").unwrap_or_default();

            if !nodes.contains_key(&e1_id) {
                let group: String = e1_node.labels().first().cloned().unwrap_or_default();
                nodes.insert(
                    e1_id.clone(),
                    GraphNode { id: e1_id.clone(), label: e1_id.clone(), group },
                );
            }
            if !nodes.contains_key(&e2_id) {
                let group: String = e2_node.labels().first().cloned().unwrap_or_default();
                nodes.insert(
                    e2_id.clone(),
                    GraphNode { id: e2_id.clone(), label: e2_id.clone(), group },
                );
            }

            edges.push(GraphEdge { source: e1_id, target: e2_id, label: r_rel.typ() });
        }
    }

    Ok(Json(GraphData { nodes: nodes.into_values().collect(), edges }))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
