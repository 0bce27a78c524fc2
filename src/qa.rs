//! Cadena de pregunta-respuesta sobre el grafo.
//!
//! Flujo:
//!   1. El LLM traduce la pregunta a una consulta Cypher guiándose por el
//!      esquema vivo de la base.
//!   2. La consulta se ejecuta contra Neo4j.
//!   3. El LLM redacta la respuesta final usando las filas como contexto.

use anyhow::Result;
use neo4rs::{query, Graph, Row};
use serde::Serialize;
use tracing::info;

use crate::llm::{clean_fenced_response, GeminiChat};

/// Columna única que se pide a las consultas generadas.
const RESULT_COLUMN: &str = "result";

/// Máximo de filas que se pasan como contexto al redactor de la respuesta.
const MAX_CONTEXT_ROWS: usize = 10;

const NO_RESULTS_ANSWER: &str =
    "No se encontró información en el grafo para responder a esta pregunta.";

pub const CYPHER_GENERATION_TEMPLATE: &str = r#"Task: Generate a Cypher query to fetch information from the medical graph.

Instructions:
- Use only relationships and properties available in schema.
- Do not invent relationships or properties outside schema.
- Return Cypher query only (no explanation).
- Return plain values aliased AS result, converting with toString() where needed.

Schema:
{schema}

Question: {question}"#;

pub const QA_TEMPLATE: &str = r#"You are an assistant that helps to form nice and human understandable answers.
The information part contains the results of a database query that you must use to construct an answer.
The provided information is authoritative; never doubt it or try to correct it with internal knowledge.
Make the answer sound like a response to the question and do not mention the query or the database.

Information:
{context}

Question: {question}
Helpful Answer:"#;

/// Resultado de una pregunta: la respuesta redactada y el Cypher que se
/// ejecutó para obtenerla.
#[derive(Debug, Clone, Serialize)]
pub struct QaOutcome {
    pub answer: String,
    pub cypher: String,
}

/// La cadena queda ligada al esquema que había al terminar el procesado del
/// PDF; se reconstruye tras cada subida con éxito.
#[derive(Debug, Clone)]
pub struct CypherQaChain {
    chat: GeminiChat,
    schema: String,
}

impl CypherQaChain {
    pub fn new(chat: GeminiChat, schema: String) -> Self {
        Self { chat, schema }
    }

    /// Responde una pregunta en lenguaje natural contra el grafo.
    pub async fn ask(&self, graph: &Graph, question: &str) -> Result<QaOutcome> {
        let generated = self
            .chat
            .generate(None, &generation_prompt(&self.schema, question))
            .await?;
        let cypher = clean_fenced_response(&generated).to_string();
        info!("Cypher generado: {cypher}");

        let mut rows = execute_cypher(graph, &cypher).await?;
        if rows.is_empty() {
            return Ok(QaOutcome { answer: NO_RESULTS_ANSWER.to_string(), cypher });
        }
        rows.truncate(MAX_CONTEXT_ROWS);

        let context = rows.join("\n");
        let answer = self
            .chat
            .generate(None, &qa_prompt(&context, question))
            .await?;

        Ok(QaOutcome { answer: answer.trim().to_string(), cypher })
    }
}

fn generation_prompt(schema: &str, question: &str) -> String {
    CYPHER_GENERATION_TEMPLATE
        .replace("{schema}", schema)
        .replace("{question}", question)
}

fn qa_prompt(context: &str, question: &str) -> String {
    QA_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

async fn execute_cypher(graph: &Graph, cypher: &str) -> Result<Vec<String>> {
    let mut cursor = graph.execute(query(cypher)).await?;
    let mut lines = Vec::new();
    while let Some(row) = cursor.next().await? {
        lines.push(render_result_cell(&row));
    }
    Ok(lines)
}

/// Decodifica la columna `result` probando los tipos de valor habituales.
fn render_result_cell(row: &Row) -> String {
    if let Some(text) = row.get::<String>(RESULT_COLUMN) {
        return text;
    }
    if let Some(number) = row.get::<i64>(RESULT_COLUMN) {
        return number.to_string();
    }
    if let Some(number) = row.get::<f64>(RESULT_COLUMN) {
        return number.to_string();
    }
    if let Some(flag) = row.get::<bool>(RESULT_COLUMN) {
        return flag.to_string();
    }
    if let Some(items) = row.get::<Vec<String>>(RESULT_COLUMN) {
        return items.join(", ");
    }
    "(valor no representable como texto)".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn el_prompt_de_generacion_incluye_esquema_y_pregunta() {
        let prompt = generation_prompt(
            "(:Patient)-[:HAS_DISEASE]->(:Disease)",
            "¿Qué enfermedades tiene Juan?",
        );
        assert!(prompt.contains("fetch information from the medical graph"));
        assert!(prompt.contains("aliased AS result"));
        assert!(prompt.contains("(:Patient)-[:HAS_DISEASE]->(:Disease)"));
        assert!(prompt.contains("¿Qué enfermedades tiene Juan?"));
        assert!(!prompt.contains("{schema}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn el_prompt_de_redaccion_incluye_el_contexto() {
        let prompt = qa_prompt("Diabetes\nHipertensión", "¿Qué enfermedades tiene Juan?");
        assert!(prompt.contains("Diabetes\nHipertensión"));
        assert!(prompt.contains("Helpful Answer:"));
    }
}
