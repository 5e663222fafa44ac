//! # Aquisição de Sessão de Portal
//!
//! Portais renderizados no servidor exigem que cada POST de formulário siga
//! um GET anterior: o GET entrega cookies de sessão e um token de estado num
//! `<input>` oculto. Este módulo faz esse GET e extrai o token; os cookies
//! ficam retidos no próprio cliente HTTP. O contexto vale para uma única
//! unidade de trabalho: o servidor pode rotacionar tokens por sessão, então
//! nada aqui é persistido nem compartilhado.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use tracing::warn;

use crate::errors::ExtracaoError;

const AGENTE_NAVEGADOR: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/126.0.0.0 Safari/537.36";

const TEMPO_LIMITE: Duration = Duration::from_secs(60);

/// Contexto de sessão de uma unidade: o token de estado do formulário.
/// Os cookies correspondentes vivem no armazenamento do cliente.
#[derive(Debug, Clone)]
pub struct ContextoSessao {
    pub token: String,
}

/// Cria o cliente HTTP reutilizado pela corrida inteira.
///
/// Cabeçalhos imitam um navegador comum (os portais recusam agentes
/// desconhecidos) e todo pedido carrega tempo limite explícito.
pub fn criar_cliente() -> Result<Client, ExtracaoError> {
    let mut cabecalhos = HeaderMap::new();
    cabecalhos.insert(USER_AGENT, HeaderValue::from_static(AGENTE_NAVEGADOR));
    cabecalhos.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/json;q=0.9,*/*;q=0.8"),
    );
    cabecalhos.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pt-BR,pt;q=0.9"));

    let cliente = Client::builder()
        .cookie_store(true)
        .default_headers(cabecalhos)
        .timeout(TEMPO_LIMITE)
        .build()
        .map_err(ExtracaoError::Rede)?;

    Ok(cliente)
}

/// GET na página do portal e extração do token de estado.
///
/// # Erros
/// `Sessao` se o campo oculto esperado não existir na página (layout mudou),
/// `Status`/`Rede` se o próprio GET falhar. Nenhuma repetição é feita aqui;
/// quem decide repetir a unidade é o chamador.
pub async fn adquirir(
    cliente: &Client,
    url: &str,
    campo_token: &str,
) -> Result<ContextoSessao, ExtracaoError> {
    let resposta = cliente.get(url).send().await.map_err(ExtracaoError::Rede)?;

    let status = resposta.status();
    if !status.is_success() {
        return Err(ExtracaoError::Status {
            status,
            url: url.to_string(),
        });
    }

    let corpo = resposta.text().await.map_err(ExtracaoError::Rede)?;
    let token = extrair_token(&corpo, campo_token)?;
    Ok(ContextoSessao { token })
}

/// Procura o `<input>` oculto `campo_token` e devolve seu atributo `value`.
pub fn extrair_token(html: &str, campo_token: &str) -> Result<String, ExtracaoError> {
    let documento = Html::parse_document(html);
    let seletor = Selector::parse(&format!("input[name=\"{}\"]", campo_token))
        .map_err(|e| ExtracaoError::Sessao(format!("seletor inválido: {}", e)))?;

    match documento
        .select(&seletor)
        .next()
        .and_then(|entrada| entrada.attr("value"))
    {
        Some(valor) if !valor.is_empty() => Ok(valor.to_string()),
        _ => {
            let previa: String = html.chars().take(200).collect();
            warn!(campo = campo_token, previa, "campo de token ausente na página");
            Err(ExtracaoError::Sessao(format!(
                "campo '{}' ausente na página do portal",
                campo_token
            )))
        }
    }
}
