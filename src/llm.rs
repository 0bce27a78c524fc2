//! Clientes HTTP para la API Generative Language de Google (Gemini).
//! Se construyen por sesión con la clave que llega del formulario.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Modelo de chat usado por toda la aplicación.
pub const CHAT_MODEL: &str = "gemini-1.5-flash";
/// Modelo de embeddings de 768 dimensiones.
pub const EMBEDDING_MODEL: &str = "embedding-001";
/// Temperatura baja para que la extracción y el Cypher sean estables.
pub const CHAT_TEMPERATURE: f32 = 0.2;
/// Dimensiones que produce el modelo de embeddings.
pub const EMBEDDING_DIMENSIONS: usize = 768;

/// Máximo de textos por llamada al endpoint de lotes.
const EMBED_BATCH_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Tipos de cable (JSON) de la API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part { text: text.to_string() }],
        }
    }

    fn bare(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part { text: text.to_string() }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Serialize)]
struct BatchEmbedContentsRequest {
    requests: Vec<BatchEmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedContentsResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

// ---------------------------------------------------------------------------
// Cliente de chat
// ---------------------------------------------------------------------------

/// Cliente de generación de texto (`generateContent`).
#[derive(Debug, Clone)]
pub struct GeminiChat {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiChat {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: CHAT_MODEL.to_string(),
            temperature: CHAT_TEMPERATURE,
        }
    }

    /// Envía un prompt (con instrucción de sistema opcional) y devuelve el
    /// texto del primer candidato.
    pub async fn generate(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let url = format!(
            "{GEMINI_API_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let request = GenerateContentRequest {
            contents: vec![Content::user(prompt)],
            system_instruction: system.map(Content::bare),
            generation_config: GenerationConfig { temperature: self.temperature },
        };

        let response = self.http.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("La API de Gemini devolvió {status}: {body}"));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| anyhow!("La API de Gemini no devolvió ningún candidato"))?;

        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Cliente de embeddings
// ---------------------------------------------------------------------------

/// Cliente de embeddings (`batchEmbedContents`).
#[derive(Debug, Clone)]
pub struct GeminiEmbeddings {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiEmbeddings {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: EMBEDDING_MODEL.to_string(),
        }
    }

    /// Embebe una lista de textos respetando el límite de lote de la API.
    /// Devuelve un vector por texto, en el mismo orden.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let url = format!(
            "{GEMINI_API_BASE}/models/{}:batchEmbedContents?key={}",
            self.model, self.api_key
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let request = BatchEmbedContentsRequest {
                requests: batch
                    .iter()
                    .map(|text| BatchEmbedRequest {
                        model: format!("models/{}", self.model),
                        content: Content::bare(text),
                    })
                    .collect(),
            };

            let response = self.http.post(&url).json(&request).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!("La API de Gemini devolvió {status}: {body}"));
            }

            let parsed: BatchEmbedContentsResponse = response.json().await?;
            if parsed.embeddings.len() != batch.len() {
                return Err(anyhow!(
                    "Número de embeddings ({}) distinto al número de textos ({})",
                    parsed.embeddings.len(),
                    batch.len()
                ));
            }
            vectors.extend(parsed.embeddings.into_iter().map(|e| e.values));
        }

        Ok(vectors)
    }
}

// ---------------------------------------------------------------------------
// Limpieza de respuestas
// ---------------------------------------------------------------------------

/// Extrae el contenido de una valla de código (```json ... ``` o
/// ```cypher ... ```) si la respuesta viene envuelta en una; si no hay
/// valla devuelve el texto recortado tal cual.
pub fn clean_fenced_response(response: &str) -> &str {
    let text = response.trim();
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    let body = match after.find("```") {
        Some(end) => &after[..end],
        None => after,
    };
    // La primera palabra solo es etiqueta de lenguaje si es una conocida o
    // si ocupa la primera línea entera; «```MATCH ...```» empieza por código.
    let tag_len = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    let (word, rest) = body.split_at(tag_len);
    if !word.is_empty()
        && (word.eq_ignore_ascii_case("cypher")
            || word.eq_ignore_ascii_case("json")
            || rest.starts_with('\n')
            || rest.starts_with("\r\n"))
    {
        return rest.trim();
    }
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn peticion_de_chat_usa_camel_case() {
        let request = GenerateContentRequest {
            contents: vec![Content::user("hola")],
            system_instruction: Some(Content::bare("eres un asistente")),
            generation_config: GenerationConfig { temperature: 0.2 },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "eres un asistente");
        assert!((value["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn peticion_sin_sistema_omite_el_campo() {
        let request = GenerateContentRequest {
            contents: vec![Content::user("hola")],
            system_instruction: None,
            generation_config: GenerationConfig { temperature: 0.2 },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn respuesta_de_chat_se_deserializa() {
        let raw = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "respuesta"}]},
                "finishReason": "STOP"
            }]
        });
        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let text = &parsed.candidates[0].content.as_ref().unwrap().parts[0].text;
        assert_eq!(text, "respuesta");
    }

    #[test]
    fn lote_de_embeddings_lleva_el_modelo() {
        let request = BatchEmbedContentsRequest {
            requests: vec![BatchEmbedRequest {
                model: "models/embedding-001".into(),
                content: Content::bare("texto"),
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["requests"][0]["model"], "models/embedding-001");
        assert!(value["requests"][0]["content"].get("role").is_none());
    }

    #[test]
    fn respuesta_de_lote_se_deserializa() {
        let raw = json!({"embeddings": [{"values": [0.1, 0.2]}, {"values": [0.3]}]});
        let parsed: BatchEmbedContentsResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1].values, vec![0.3]);
    }

    #[test]
    fn limpia_valla_json() {
        let raw = "```json\n{\"nodes\": []}\n```";
        assert_eq!(clean_fenced_response(raw), "{\"nodes\": []}");
    }

    #[test]
    fn limpia_valla_cypher_con_texto_alrededor() {
        let raw = "Aquí tienes:\n```cypher\nMATCH (p:Patient) RETURN p.id\n```\nEspero que sirva.";
        assert_eq!(clean_fenced_response(raw), "MATCH (p:Patient) RETURN p.id");
    }

    #[test]
    fn valla_sin_etiqueta_tambien_se_limpia() {
        let raw = "```\nMATCH (n) RETURN n\n```";
        assert_eq!(clean_fenced_response(raw), "MATCH (n) RETURN n");
    }

    #[test]
    fn valla_de_una_linea_sin_etiqueta_conserva_la_primera_palabra() {
        let raw = "```MATCH (p:Patient) RETURN p.id AS result```";
        assert_eq!(clean_fenced_response(raw), "MATCH (p:Patient) RETURN p.id AS result");
    }

    #[test]
    fn la_etiqueta_en_la_misma_linea_que_el_codigo_se_descarta() {
        let raw = "```cypher MATCH (n) RETURN n```";
        assert_eq!(clean_fenced_response(raw), "MATCH (n) RETURN n");
    }

    #[test]
    fn texto_sin_valla_queda_igual() {
        assert_eq!(clean_fenced_response("  MATCH (n) RETURN n  "), "MATCH (n) RETURN n");
    }

    #[tokio::test]
    #[ignore = "requiere GEMINI_API_KEY y acceso a la red"]
    async fn chat_en_vivo() {
        let key = std::env::var("GEMINI_API_KEY").unwrap();
        let chat = GeminiChat::new(&key);
        let answer = chat.generate(None, "Di 'hola' y nada más.").await.unwrap();
        assert!(!answer.is_empty());
    }

    #[tokio::test]
    #[ignore = "requiere GEMINI_API_KEY y acceso a la red"]
    async fn embeddings_en_vivo() {
        let key = std::env::var("GEMINI_API_KEY").unwrap();
        let embeddings = GeminiEmbeddings::new(&key);
        let vectors = embeddings.embed_texts(&["informe médico".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), EMBEDDING_DIMENSIONS);
    }
}
