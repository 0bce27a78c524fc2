//! Procesado de un PDF subido: extracción de texto, troceado, extracción del
//! grafo con el LLM y persistencia en Neo4j, terminando con el índice híbrido
//! y la cadena de preguntas lista para usar.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use mime_guess::MimeGuess;
use neo4rs::{query, Graph, Txn};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_state::Status,
    graph_transformer::GraphTransformer,
    llm::{GeminiChat, GeminiEmbeddings},
    models::{DocumentChunk, GraphDocument},
    neo4j_client,
    qa::CypherQaChain,
    text_splitter::TextSplitter,
    vector_store,
};

/// Resumen de los resultados de procesar un PDF.
#[derive(Debug, Default, serde::Serialize)]
pub struct ProcessingSummary {
    pub file_name: String,
    pub chunks_processed: usize,
    pub nodes_created: usize,
    pub relationships_created: usize,
    pub embeddings_created: usize,
}

impl std::fmt::Display for ProcessingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: '{}' procesado en {} trozos. {} entidades, {} relaciones y {} embeddings en el grafo.",
            self.file_name,
            self.chunks_processed,
            self.nodes_created,
            self.relationships_created,
            self.embeddings_created
        )
    }
}

/// Ejecuta el pipeline completo sobre un PDF subido. El grafo anterior se
/// vacía siempre antes de guardar: cada subida reemplaza, nunca acumula.
/// Devuelve el resumen junto con la cadena de preguntas recién construida;
/// quien llama decide cuándo guardarla en la sesión.
pub async fn process_document(
    graph: &Graph,
    chat: &GeminiChat,
    embeddings: &GeminiEmbeddings,
    file_name: &str,
    bytes: &[u8],
    status: Arc<Mutex<Status>>,
) -> Result<(ProcessingSummary, CypherQaChain)> {
    ensure_pdf(file_name)?;

    set_status(&status, format!("Extrayendo texto de '{file_name}'..."), 0.05);
    let text = pdf_extract::extract_text_from_mem(bytes)?;
    if text.trim().is_empty() {
        return Err(anyhow!("El PDF '{file_name}' no contiene texto extraíble"));
    }

    set_status(&status, "Troceando el texto...".to_string(), 0.10);
    let chunks = make_chunks(&text, file_name);
    if chunks.is_empty() {
        return Err(anyhow!("El PDF '{file_name}' no contiene texto útil"));
    }
    info!("'{file_name}': {} trozos para procesar.", chunks.len());

    set_status(&status, "Vaciando el grafo anterior...".to_string(), 0.15);
    neo4j_client::clear_graph(graph).await?;

    let transformer = GraphTransformer::new(chat.clone());
    let total = chunks.len();
    let mut graph_docs: Vec<GraphDocument> = Vec::with_capacity(total);
    for (index, chunk) in chunks.iter().enumerate() {
        set_status(
            &status,
            format!("[{}/{}] Extrayendo conocimiento del trozo...", index + 1, total),
            0.15 + 0.55 * ((index + 1) as f32 / total as f32),
        );
        let doc = transformer.convert_chunk(chunk).await?;
        if doc.is_empty() {
            warn!("El trozo {}/{} no aportó nodos ni relaciones.", index + 1, total);
        }
        graph_docs.push(doc);
    }

    set_status(&status, "Guardando el grafo en Neo4j...".to_string(), 0.75);
    let tx = graph.start_txn().await?;
    let (nodes_created, relationships_created) =
        store_graph_documents(&tx, &graph_docs).await?;
    tx.commit().await?;

    set_status(&status, "Construyendo el índice híbrido...".to_string(), 0.85);
    vector_store::ensure_hybrid_index(graph).await?;
    let embeddings_created = vector_store::backfill_embeddings(graph, embeddings).await?;

    set_status(&status, "Preparando la cadena de preguntas...".to_string(), 0.95);
    let schema = neo4j_client::fetch_schema(graph).await?;
    let chain = CypherQaChain::new(chat.clone(), schema.to_string());

    let summary = ProcessingSummary {
        file_name: file_name.to_string(),
        chunks_processed: total,
        nodes_created,
        relationships_created,
        embeddings_created,
    };
    info!("{summary}");

    Ok((summary, chain))
}

/// Persiste los documentos de grafo en una única transacción, enlazando cada
/// trozo como nodo :Document con relaciones MENTIONS hacia sus entidades.
async fn store_graph_documents(
    tx: &Txn,
    graph_docs: &[GraphDocument],
) -> Result<(usize, usize)> {
    let mut unique_nodes: HashSet<(String, String)> = HashSet::new();
    let mut unique_relationships: HashSet<(String, String, String)> = HashSet::new();

    for doc in graph_docs {
        for node in &doc.nodes {
            if unique_nodes.insert((node.id.clone(), node.label.clone())) {
                let cypher = format!("MERGE (n:`{}` {{id: $id}})", node.label);
                tx.run(query(&cypher).param("id", node.id.clone())).await?;
            }
        }

        for rel in &doc.relationships {
            let source_label = doc.nodes.iter().find(|n| n.id == rel.source);
            let target_label = doc.nodes.iter().find(|n| n.id == rel.target);
            let (Some(source), Some(target)) = (source_label, target_label) else {
                continue;
            };
            unique_relationships.insert((
                rel.source.clone(),
                rel.rel_type.clone(),
                rel.target.clone(),
            ));
            let cypher = format!(
                "MATCH (s:`{}` {{id: $source}}), (t:`{}` {{id: $target}})
                 MERGE (s)-[:`{}`]->(t)",
                source.label, target.label, rel.rel_type
            );
            tx.run(
                query(&cypher)
                    .param("source", rel.source.clone())
                    .param("target", rel.target.clone()),
            )
            .await?;
        }

        // Procedencia: el trozo queda en el grafo como :Document enlazado a
        // todo lo que se extrajo de él.
        let document_id = Uuid::new_v4().to_string();
        tx.run(
            query("MERGE (d:Document {id: $id}) SET d.text = $text, d.source = $source")
                .param("id", document_id.clone())
                .param("text", doc.source.text.clone())
                .param("source", doc.source.source.clone()),
        )
        .await?;
        for node in &doc.nodes {
            let cypher = format!(
                "MATCH (d:Document {{id: $document_id}}), (e:`{}` {{id: $entity_id}})
                 MERGE (d)-[:MENTIONS]->(e)",
                node.label
            );
            tx.run(
                query(&cypher)
                    .param("document_id", document_id.clone())
                    .param("entity_id", node.id.clone()),
            )
            .await?;
        }
    }

    Ok((unique_nodes.len(), unique_relationships.len()))
}

/// Trocea el texto extraído y deja cada trozo sin saltos de línea y con el
/// nombre del fichero como origen.
fn make_chunks(text: &str, source: &str) -> Vec<DocumentChunk> {
    TextSplitter::default()
        .split(text)
        .into_iter()
        .map(|chunk| DocumentChunk {
            text: chunk.replace('\n', ""),
            source: source.to_string(),
        })
        .filter(|chunk| !chunk.text.trim().is_empty())
        .collect()
}

/// El nombre del fichero tiene que apuntar a un PDF antes de tocar los bytes.
fn ensure_pdf(file_name: &str) -> Result<()> {
    match MimeGuess::from_path(file_name).first() {
        Some(mime) if mime == mime_guess::mime::APPLICATION_PDF => Ok(()),
        _ => Err(anyhow!("El fichero '{file_name}' no parece un PDF")),
    }
}

fn set_status(status: &Mutex<Status>, message: String, progress: f32) {
    let mut guard = status.lock().unwrap();
    guard.message = message;
    guard.progress = progress;
}
