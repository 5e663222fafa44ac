//! # Extrator Paginado/Parametrizado
//!
//! ## Visão Geral
//! Um pedido HTTP por item de trabalho (um por estabelecimento, um por
//! combinação de seleções do portal), corpo decodificado conforme a fonte,
//! linhas etiquetadas com as chaves da unidade e acumuladas numa única
//! tabela bruta.
//!
//! ## Princípios de Engenharia
//! - **Resiliência (Fail-Soft)**: a falha de um item não aborta a unidade;
//!   vira uma entrada observável na lista de falhas e o laço continua.
//!   Um resultado parcial é um desfecho aceito e esperado.
//! - **Exceção deliberada**: competência ainda não publicada invalida a
//!   unidade inteira, porque não há base de comparação a jusante.

use std::collections::HashMap;
use std::time::Duration;

use polars::prelude::DataFrame;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{ExtracaoError, PipelineError};
use crate::models::{Fonte, Itens, Relatorio, UnidadeTrabalho, resolver_modelo};
use crate::sessao;
use crate::tabular::{self, Registro};

/// Um item que falhou, com a razão; a captura seguiu adiante.
#[derive(Debug, Clone)]
pub struct FalhaItem {
    pub item: String,
    pub motivo: String,
}

/// Resultado de uma extração: a tabela bruta e as listas laterais de itens
/// sem dados e itens com falha. Itens sem dados nunca viram linhas.
#[derive(Debug)]
pub struct Coleta {
    pub tabela: DataFrame,
    pub sem_dados: Vec<String>,
    pub falhas: Vec<FalhaItem>,
}

/// Executa a extração completa de uma unidade de trabalho.
pub async fn extrair(
    cliente: &Client,
    relatorio: &Relatorio,
    unidade: &UnidadeTrabalho,
) -> Result<Coleta, PipelineError> {
    let itens = match &relatorio.itens {
        Itens::Geografia => vec![unidade.geografia.clone()],
        Itens::Consulta {
            url,
            root_path,
            campo_codigo,
        } => listar_itens(
            cliente,
            url,
            root_path.as_deref(),
            campo_codigo,
            relatorio.tentativas,
            unidade,
        )
        .await
        .map_err(PipelineError::Aquisicao)?,
    };

    info!(
        operacao = unidade.operacao,
        geografia = unidade.geografia,
        itens = itens.len(),
        "itens da unidade resolvidos"
    );

    // URLs resolvidas antes do laço: um marcador sem valor é erro de
    // catálogo e invalida a unidade, não um item.
    let mut urls = HashMap::with_capacity(itens.len());
    for item in &itens {
        let url = resolver_modelo(&relatorio.url, &marcadores(unidade, item))?;
        urls.insert(item.clone(), url);
    }

    match &relatorio.fonte {
        Fonte::Json { root_path } => {
            coletar(&itens, &relatorio.chave_item, unidade, async |item: &str| {
                buscar_json(cliente, &urls[item], root_path.as_deref(), relatorio.tentativas).await
            })
            .await
        }

        Fonte::Formulario {
            url_sessao,
            campo_token,
            campos,
            linhas_cabecalho,
            linhas_rodape,
            ..
        } => {
            let contexto = sessao::adquirir(cliente, url_sessao, campo_token)
                .await
                .map_err(PipelineError::Aquisicao)?;
            let delim = relatorio.fonte.delimitador().unwrap_or(';');

            let mut campos_por_item = HashMap::with_capacity(itens.len());
            for item in &itens {
                let mut resolvidos = Vec::with_capacity(campos.len() + 1);
                for campo in campos {
                    let valor = resolver_modelo(&campo.valor, &marcadores(unidade, item))?;
                    resolvidos.push((campo.nome.clone(), valor));
                }
                resolvidos.push((campo_token.clone(), contexto.token.clone()));
                campos_por_item.insert(item.clone(), resolvidos);
            }

            coletar(&itens, &relatorio.chave_item, unidade, async |item: &str| {
                buscar_formulario(
                    cliente,
                    &urls[item],
                    &campos_por_item[item],
                    *linhas_cabecalho,
                    *linhas_rodape,
                    delim,
                    &unidade.competencia,
                    relatorio.tentativas,
                )
                .await
            })
            .await
        }
    }
}

/// Laço de acumulação por item, genérico sobre a função de busca.
///
/// Itens com resposta vazia vão para `sem_dados`; itens com erro vão para
/// `falhas` e o laço continua. A exceção é competência não publicada, que
/// propaga e invalida a unidade.
pub async fn coletar<F>(
    itens: &[String],
    chave_item: &str,
    unidade: &UnidadeTrabalho,
    mut buscar: F,
) -> Result<Coleta, PipelineError>
where
    F: AsyncFnMut(&str) -> Result<Vec<Registro>, ExtracaoError>,
{
    let mut acumulado: Vec<Registro> = Vec::new();
    let mut sem_dados: Vec<String> = Vec::new();
    let mut falhas: Vec<FalhaItem> = Vec::new();

    for item in itens {
        match buscar(item).await {
            Ok(registros) if registros.is_empty() => {
                debug!(item, "item sem dados");
                sem_dados.push(item.clone());
            }

            Ok(registros) => {
                for mut registro in registros {
                    registro.insert(chave_item.to_string(), Value::String(item.clone()));
                    registro.insert(
                        "geografia".to_string(),
                        Value::String(unidade.geografia.clone()),
                    );
                    registro.insert(
                        "periodo".to_string(),
                        Value::String(unidade.competencia.clone()),
                    );
                    acumulado.push(registro);
                }
            }

            Err(ExtracaoError::CompetenciaIndisponivel { competencia }) => {
                return Err(PipelineError::Aquisicao(
                    ExtracaoError::CompetenciaIndisponivel { competencia },
                ));
            }

            Err(erro) => {
                warn!(item, erro = %erro, "falha de item; a captura continua");
                falhas.push(FalhaItem {
                    item: item.clone(),
                    motivo: erro.to_string(),
                });
            }
        }
    }

    let tabela = tabular::linhas_para_quadro(&acumulado)?;
    Ok(Coleta {
        tabela,
        sem_dados,
        falhas,
    })
}

/// Consulta paginada de registros: para na primeira página vazia.
/// Modelos sem `{pagina}` fazem um único pedido.
pub async fn paginar<F>(paginado: bool, mut buscar_pagina: F) -> Result<Vec<Registro>, ExtracaoError>
where
    F: AsyncFnMut(u32) -> Result<Vec<Registro>, ExtracaoError>,
{
    let mut todos = Vec::new();
    let mut pagina: u32 = 1;

    loop {
        let registros = buscar_pagina(pagina).await?;
        if registros.is_empty() {
            break;
        }
        todos.extend(registros);
        if !paginado {
            break;
        }
        pagina += 1;
    }

    Ok(todos)
}

async fn listar_itens(
    cliente: &Client,
    modelo: &str,
    root_path: Option<&str>,
    campo_codigo: &str,
    tentativas: u32,
    unidade: &UnidadeTrabalho,
) -> Result<Vec<String>, ExtracaoError> {
    let paginado = modelo.contains("{pagina}");

    let registros = paginar(paginado, async |pagina: u32| {
        let numero = pagina.to_string();
        let url = resolver_modelo(
            modelo,
            &[
                ("geografia", unidade.geografia.as_str()),
                ("competencia", unidade.competencia.as_str()),
                ("pagina", numero.as_str()),
            ],
        )
        .map_err(|e| ExtracaoError::Decodificacao(e.to_string()))?;
        buscar_json(cliente, &url, root_path, tentativas).await
    })
    .await?;

    registros
        .iter()
        .map(|registro| codigo_do_registro(registro, campo_codigo))
        .collect()
}

fn codigo_do_registro(registro: &Registro, campo: &str) -> Result<String, ExtracaoError> {
    match registro.get(campo) {
        Some(Value::String(codigo)) => Ok(codigo.clone()),
        Some(Value::Number(codigo)) => Ok(codigo.to_string()),
        _ => Err(ExtracaoError::Decodificacao(format!(
            "campo '{}' ausente na listagem de itens",
            campo
        ))),
    }
}

async fn buscar_json(
    cliente: &Client,
    url: &str,
    root_path: Option<&str>,
    tentativas: u32,
) -> Result<Vec<Registro>, ExtracaoError> {
    let resposta = enviar_com_tentativas(cliente.get(url), tentativas).await?;
    let corpo: Value = resposta
        .json()
        .await
        .map_err(|e| ExtracaoError::Decodificacao(format!("JSON inválido: {}", e)))?;
    tabular::extrair_linhas_json(&corpo, root_path)
}

#[allow(clippy::too_many_arguments)]
async fn buscar_formulario(
    cliente: &Client,
    url: &str,
    campos: &[(String, String)],
    linhas_cabecalho: usize,
    linhas_rodape: usize,
    delimitador: char,
    competencia: &str,
    tentativas: u32,
) -> Result<Vec<Registro>, ExtracaoError> {
    let pedido = cliente.post(url).form(campos);
    let resposta = enviar_com_tentativas(pedido, tentativas).await?;
    let corpo = resposta.text().await.map_err(ExtracaoError::Rede)?;

    if !tabular::competencia_publicada(&corpo, delimitador) {
        return Err(ExtracaoError::CompetenciaIndisponivel {
            competencia: competencia.to_string(),
        });
    }

    let (colunas, linhas) =
        tabular::fatiar_delimitado(&corpo, linhas_cabecalho, linhas_rodape, delimitador)?;
    Ok(tabular::registros_delimitados(&colunas, linhas))
}

/// Envia um pedido com repetição limitada.
///
/// Repete apenas erros de transporte e 5xx, com recuo linear; 4xx falha de
/// imediato.
async fn enviar_com_tentativas(
    pedido: reqwest::RequestBuilder,
    tentativas: u32,
) -> Result<reqwest::Response, ExtracaoError> {
    let tentativas = tentativas.max(1);

    for tentativa in 1..=tentativas {
        let clone = pedido
            .try_clone()
            .ok_or_else(|| ExtracaoError::Decodificacao("pedido não clonável".to_string()))?;

        match clone.send().await {
            Ok(resposta) => {
                let status = resposta.status();
                if status.is_success() {
                    return Ok(resposta);
                }

                let url = resposta.url().to_string();
                if status.is_server_error() && tentativa < tentativas {
                    debug!(%status, url, tentativa, "status de servidor; repetindo");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(tentativa))).await;
                    continue;
                }
                return Err(ExtracaoError::Status { status, url });
            }

            Err(erro) if tentativa < tentativas => {
                debug!(erro = %erro, tentativa, "erro de transporte; repetindo");
                tokio::time::sleep(Duration::from_millis(500 * u64::from(tentativa))).await;
            }

            Err(erro) => return Err(ExtracaoError::Rede(erro)),
        }
    }

    unreachable!("o laço de tentativas sempre retorna");
}

fn marcadores<'a>(
    unidade: &'a UnidadeTrabalho,
    item: &'a str,
) -> [(&'static str, &'a str); 3] {
    [
        ("geografia", unidade.geografia.as_str()),
        ("competencia", unidade.competencia.as_str()),
        ("item", item),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unidade() -> UnidadeTrabalho {
        UnidadeTrabalho {
            operacao: "estabelecimentos".to_string(),
            competencia: "202406".to_string(),
            geografia: "120001".to_string(),
            tabela_destino: "saude.estabelecimentos".to_string(),
        }
    }

    fn registro(qt: i64) -> Registro {
        json!({ "qt": qt }).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn falha_de_um_item_nao_aborta_os_demais() {
        let itens: Vec<String> = ["1", "2", "3"].map(String::from).to_vec();
        let unidade = unidade();

        let coleta = coletar(&itens, "estabelecimento", &unidade, async |item: &str| {
            match item {
                "2" => Err(ExtracaoError::Decodificacao("JSON inválido".to_string())),
                _ => Ok(vec![registro(1), registro(2)]),
            }
        })
        .await
        .unwrap();

        assert_eq!(coleta.tabela.height(), 4);
        assert_eq!(coleta.falhas.len(), 1);
        assert_eq!(coleta.falhas[0].item, "2");
        assert!(coleta.sem_dados.is_empty());

        // Dois grupos de linhas, todos etiquetados com a geografia da unidade
        let chaves = coleta.tabela.column("estabelecimento").unwrap();
        assert_eq!(
            chaves.as_materialized_series().n_unique().unwrap(),
            2,
            "esperados exatamente dois grupos de itens"
        );
        let geografias = coleta.tabela.column("geografia").unwrap();
        assert_eq!(geografias.as_materialized_series().n_unique().unwrap(), 1);
        assert_eq!(
            geografias.as_materialized_series().str_value(0).unwrap(),
            "120001"
        );
    }

    #[tokio::test]
    async fn resposta_vazia_vira_sem_dados_e_nao_linha() {
        let itens: Vec<String> = ["1", "2"].map(String::from).to_vec();
        let unidade = unidade();

        let coleta = coletar(&itens, "estabelecimento", &unidade, async |item: &str| {
            match item {
                "1" => Ok(vec![registro(7)]),
                _ => Ok(vec![]),
            }
        })
        .await
        .unwrap();

        assert_eq!(coleta.tabela.height(), 1);
        assert_eq!(coleta.sem_dados, vec!["2".to_string()]);
        assert!(coleta.falhas.is_empty());
    }

    #[tokio::test]
    async fn competencia_indisponivel_invalida_a_unidade() {
        let itens: Vec<String> = vec!["1".to_string()];
        let unidade = unidade();

        let erro = coletar(&itens, "estabelecimento", &unidade, async |_item: &str| {
            Err(ExtracaoError::CompetenciaIndisponivel {
                competencia: "202407".to_string(),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(
            erro,
            PipelineError::Aquisicao(ExtracaoError::CompetenciaIndisponivel { .. })
        ));
    }

    #[tokio::test]
    async fn paginacao_para_na_primeira_pagina_vazia() {
        let mut pedidas: Vec<u32> = Vec::new();
        let registros = paginar(true, async |pagina: u32| {
            pedidas.push(pagina);
            if pagina <= 2 {
                Ok(vec![registro(i64::from(pagina))])
            } else {
                Ok(vec![])
            }
        })
        .await
        .unwrap();

        assert_eq!(registros.len(), 2);
        assert_eq!(pedidas, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn modelo_sem_pagina_faz_um_unico_pedido() {
        let mut pedidas = 0u32;
        let registros = paginar(false, async |_pagina: u32| {
            pedidas += 1;
            Ok(vec![registro(1)])
        })
        .await
        .unwrap();

        assert_eq!(registros.len(), 1);
        assert_eq!(pedidas, 1);
    }

    #[test]
    fn codigo_aceita_texto_e_numero() {
        let r = json!({ "codigo": "55" }).as_object().unwrap().clone();
        assert_eq!(codigo_do_registro(&r, "codigo").unwrap(), "55");

        let r = json!({ "codigo": 55 }).as_object().unwrap().clone();
        assert_eq!(codigo_do_registro(&r, "codigo").unwrap(), "55");

        let r = json!({ "outro": 1 }).as_object().unwrap().clone();
        assert!(codigo_do_registro(&r, "codigo").is_err());
    }
}
