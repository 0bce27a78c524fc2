//! Índice híbrido sobre los nodos `:Patient`: índice vectorial para búsqueda
//! semántica más índice de texto completo para búsqueda por palabras clave.

use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;

use crate::llm::{GeminiEmbeddings, EMBEDDING_DIMENSIONS};

pub const VECTOR_INDEX_NAME: &str = "vector_index";
pub const KEYWORD_INDEX_NAME: &str = "entity_index";

const INDEX_NODE_LABEL: &str = "Patient";
const BACKFILL_BATCH: usize = 1000;

/// Garantiza que la pareja de índices del modo híbrido exista.
pub async fn ensure_hybrid_index(graph: &Graph) -> Result<()> {
    if vector_index_exists(graph).await? {
        info!("Índice vectorial '{VECTOR_INDEX_NAME}' ya existe.");
    } else {
        graph.run(query(&vector_index_statement())).await?;
        info!("Índice vectorial '{VECTOR_INDEX_NAME}' creado.");
    }

    graph.run(query(&keyword_index_statement())).await?;
    info!("Índice de palabras clave '{KEYWORD_INDEX_NAME}' asegurado.");

    Ok(())
}

/// Calcula embeddings para los `:Patient` que todavía no tienen, por lotes,
/// representando cada nodo como sus propiedades de texto línea a línea.
pub async fn backfill_embeddings(
    graph: &Graph,
    embeddings: &GeminiEmbeddings,
) -> Result<usize> {
    let fetch = format!(
        "MATCH (n:{INDEX_NODE_LABEL})
         WHERE n.embedding IS NULL
         RETURN elementId(n) AS element_id,
                coalesce(n.id, '') AS id_value,
                coalesce(n.text, '') AS text_value
         LIMIT {BACKFILL_BATCH}"
    );

    let mut updated = 0usize;
    loop {
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut cursor = graph.execute(query(&fetch)).await?;
        while let Some(row) = cursor.next().await? {
            let Some(element_id) = row.get::<String>("element_id") else { continue };
            let id_value = row.get::<String>("id_value").unwrap_or_default();
            let text_value = row.get::<String>("text_value").unwrap_or_default();
            pending.push((element_id, embedding_source_text(&id_value, &text_value)));
        }
        if pending.is_empty() {
            break;
        }

        let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
        let vectors = embeddings.embed_texts(&texts).await?;

        for ((element_id, _), vector) in pending.iter().zip(vectors) {
            graph
                .run(
                    query(
                        "MATCH (n) WHERE elementId(n) = $element_id
                         SET n.embedding = $embedding",
                    )
                    .param("element_id", element_id.as_str())
                    .param("embedding", vector),
                )
                .await?;
            updated += 1;
        }
    }

    if updated > 0 {
        info!("Embeddings calculados para {updated} nodos :{INDEX_NODE_LABEL}.");
    }
    Ok(updated)
}

async fn vector_index_exists(graph: &Graph) -> Result<bool> {
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", VECTOR_INDEX_NAME),
        )
        .await?;
    Ok(cursor.next().await?.is_some())
}

fn vector_index_statement() -> String {
    format!(
        "\
CREATE VECTOR INDEX {VECTOR_INDEX_NAME}
FOR (n:{INDEX_NODE_LABEL})
ON (n.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {EMBEDDING_DIMENSIONS},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    )
}

fn keyword_index_statement() -> String {
    format!(
        "CREATE FULLTEXT INDEX {KEYWORD_INDEX_NAME} IF NOT EXISTS \
         FOR (n:{INDEX_NODE_LABEL}) ON EACH [n.id, n.text]"
    )
}

/// El texto que se embebe por nodo: cada propiedad en su propia línea.
fn embedding_source_text(id_value: &str, text_value: &str) -> String {
    format!("id: {id_value}\ntext: {text_value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn el_indice_vectorial_usa_768_dimensiones_y_coseno() {
        let stmt = vector_index_statement();
        assert!(stmt.contains("CREATE VECTOR INDEX vector_index"));
        assert!(stmt.contains("FOR (n:Patient)"));
        assert!(stmt.contains("`vector.dimensions`: 768"));
        assert!(stmt.contains("'cosine'"));
    }

    #[test]
    fn el_indice_de_palabras_clave_cubre_id_y_texto() {
        let stmt = keyword_index_statement();
        assert!(stmt.contains("CREATE FULLTEXT INDEX entity_index IF NOT EXISTS"));
        assert!(stmt.contains("[n.id, n.text]"));
    }

    #[test]
    fn el_texto_a_embeber_lista_las_propiedades() {
        let text = embedding_source_text("Juan Pérez", "");
        assert_eq!(text, "id: Juan Pérez\ntext: ");
    }
}
