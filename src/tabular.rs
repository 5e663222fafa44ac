//! # Decodificação de Corpos Tabulares
//!
//! ## Visão Geral
//! Funções puras que transformam corpos de resposta (JSON com envelope, ou
//! texto delimitado com ruído de cabeçalho e rodapé) em registros e, ao
//! final, em um DataFrame. Nenhuma função deste módulo faz I/O de rede.

use std::io::Cursor;

use polars::io::SerReader;
use polars::prelude::*;
use serde_json::{Map, Value};

use crate::errors::{ExtracaoError, PipelineError};

/// Um registro bruto: nome de coluna → valor, na forma que a fonte devolve.
pub type Registro = Map<String, Value>;

/// Extrai a lista de registros de um envelope JSON.
///
/// Se `root_path` estiver presente, a lista é procurada sob essa chave
/// (ex: "resultado", "dados"); caso contrário assume-se lista na raiz.
/// Uma lista vazia é um resultado válido (item sem dados), não um erro.
pub fn extrair_linhas_json(
    corpo: &Value,
    root_path: Option<&str>,
) -> Result<Vec<Registro>, ExtracaoError> {
    let lista = match root_path {
        Some(chave) => corpo.get(chave).ok_or_else(|| {
            ExtracaoError::Decodificacao(format!("campo '{}' ausente no envelope", chave))
        })?,
        None => corpo,
    };

    let itens = lista.as_array().ok_or_else(|| {
        ExtracaoError::Decodificacao("o campo de resultados não é uma lista".to_string())
    })?;

    let mut registros = Vec::with_capacity(itens.len());
    for item in itens {
        let objeto = item.as_object().ok_or_else(|| {
            ExtracaoError::Decodificacao("elemento da lista não é um objeto".to_string())
        })?;
        registros.push(objeto.clone());
    }
    Ok(registros)
}

/// Fatia um corpo delimitado em (nomes de colunas, linhas de dados).
///
/// Linhas totalmente em branco são descartadas antes de aplicar os
/// deslocamentos, para que contagens fixas de preâmbulo/rodapé continuem
/// corretas mesmo com linhas vazias ao redor do conteúdo. A linha
/// imediatamente após o preâmbulo é o cabeçalho de colunas.
///
/// # Erros
/// `CorpoVazio` quando nem o cabeçalho de colunas sobrevive à fatia.
/// Zero linhas de dados com cabeçalho presente é um resultado válido.
pub fn fatiar_delimitado(
    corpo: &str,
    linhas_cabecalho: usize,
    linhas_rodape: usize,
    delimitador: char,
) -> Result<(Vec<String>, Vec<Vec<String>>), ExtracaoError> {
    let linhas: Vec<&str> = corpo
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .collect();

    if linhas.len() < linhas_cabecalho + linhas_rodape + 1 {
        return Err(ExtracaoError::CorpoVazio);
    }

    let colunas: Vec<String> = dividir(linhas[linhas_cabecalho], delimitador);

    let inicio = linhas_cabecalho + 1;
    let fim = linhas.len() - linhas_rodape;
    let dados = &linhas[inicio..fim];

    let mut registros = Vec::with_capacity(dados.len());
    for linha in dados {
        let mut campos = dividir(linha, delimitador);
        // Linha mais curta que o cabeçalho: completa com vazio, nunca desloca.
        campos.resize(colunas.len(), String::new());
        campos.truncate(colunas.len());
        registros.push(campos);
    }

    Ok((colunas, registros))
}

fn dividir(linha: &str, delimitador: char) -> Vec<String> {
    linha
        .split(delimitador)
        .map(|campo| campo.trim().trim_matches('"').to_string())
        .collect()
}

/// Heurística de competência publicada.
///
/// Quando a competência pedida ainda não existe na fonte, o portal devolve
/// corpo vazio ou uma página HTML de erro em vez da tabela delimitada.
pub fn competencia_publicada(corpo: &str, delimitador: char) -> bool {
    let aparado = corpo.trim_start_matches('\u{feff}').trim();
    if aparado.is_empty() {
        return false;
    }
    if aparado.starts_with('<') {
        return false;
    }
    aparado.contains(delimitador)
}

/// Converte linhas fatiadas em registros nome → valor (tudo texto).
pub fn registros_delimitados(colunas: &[String], linhas: Vec<Vec<String>>) -> Vec<Registro> {
    linhas
        .into_iter()
        .map(|linha| {
            colunas
                .iter()
                .cloned()
                .zip(linha.into_iter().map(Value::String))
                .collect()
        })
        .collect()
}

/// Monta um DataFrame a partir dos registros acumulados.
///
/// A lista é serializada de volta a bytes e lida pelo leitor JSON do Polars,
/// que infere o esquema sobre o conjunto completo: colunas presentes só em
/// parte dos registros viram nulos nas demais linhas.
pub fn linhas_para_quadro(registros: &[Registro]) -> Result<DataFrame, PipelineError> {
    if registros.is_empty() {
        return Ok(DataFrame::empty());
    }

    let json_bytes = serde_json::to_vec(registros)
        .map_err(|e| PipelineError::Configuracao(format!("serialização dos registros: {}", e)))?;
    let cursor = Cursor::new(json_bytes);

    let quadro = JsonReader::new(cursor)
        .infer_schema_len(None)
        .finish()
        .map_err(PipelineError::Quadro)?;

    Ok(quadro)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CORPO_PORTAL: &str = "\n\nRelatório de Produção\nMinistério da Saúde\n;;\nUf;Municipio;Qt\n\"AC\";\"120001\";10\nAC;120020;5\nFonte: portal\nData de emissão: 01/07/2024\n\n";

    #[test]
    fn fatia_com_ruido_e_linhas_em_branco() {
        // 3 linhas de preâmbulo, cabeçalho, 2 de dados, 2 de rodapé
        let (colunas, linhas) = fatiar_delimitado(CORPO_PORTAL, 3, 2, ';').unwrap();
        assert_eq!(colunas, vec!["Uf", "Municipio", "Qt"]);
        assert_eq!(linhas.len(), 2);
        assert_eq!(linhas[0], vec!["AC", "120001", "10"]);
        assert_eq!(linhas[1], vec!["AC", "120020", "5"]);
    }

    #[test]
    fn cabecalho_sem_dados_e_valido() {
        let corpo = "a\nb\nUf;Qt\nrodape";
        let (colunas, linhas) = fatiar_delimitado(corpo, 2, 1, ';').unwrap();
        assert_eq!(colunas, vec!["Uf", "Qt"]);
        assert!(linhas.is_empty());
    }

    #[test]
    fn corpo_curto_demais_e_vazio() {
        let err = fatiar_delimitado("so uma linha", 3, 2, ';').unwrap_err();
        assert!(matches!(err, ExtracaoError::CorpoVazio));
    }

    #[test]
    fn linha_curta_e_completada_sem_deslocar() {
        let corpo = "Uf;Municipio;Qt\nAC;120001";
        let (colunas, linhas) = fatiar_delimitado(corpo, 0, 0, ';').unwrap();
        assert_eq!(colunas.len(), 3);
        assert_eq!(linhas[0], vec!["AC", "120001", ""]);
    }

    #[test]
    fn competencia_publicada_reconhece_tabela() {
        assert!(competencia_publicada("Uf;Qt\nAC;1", ';'));
        assert!(!competencia_publicada("", ';'));
        assert!(!competencia_publicada("   \n  ", ';'));
        assert!(!competencia_publicada("<html><body>Erro</body></html>", ';'));
        assert!(!competencia_publicada("sem delimitador nenhum", ';'));
    }

    #[test]
    fn envelope_json_sob_root_path() {
        let corpo = json!({ "resultado": [ {"codigo": "1"}, {"codigo": "2"} ], "total": 2 });
        let registros = extrair_linhas_json(&corpo, Some("resultado")).unwrap();
        assert_eq!(registros.len(), 2);
        assert_eq!(registros[1]["codigo"], json!("2"));
    }

    #[test]
    fn lista_na_raiz_sem_root_path() {
        let corpo = json!([ {"a": 1} ]);
        assert_eq!(extrair_linhas_json(&corpo, None).unwrap().len(), 1);
    }

    #[test]
    fn lista_vazia_nao_e_erro() {
        let corpo = json!({ "resultado": [] });
        assert!(extrair_linhas_json(&corpo, Some("resultado")).unwrap().is_empty());
    }

    #[test]
    fn root_path_ausente_e_decodificacao() {
        let corpo = json!({ "dados": [] });
        let err = extrair_linhas_json(&corpo, Some("resultado")).unwrap_err();
        assert!(matches!(err, ExtracaoError::Decodificacao(_)));
    }

    #[test]
    fn corpo_nao_lista_e_decodificacao() {
        let corpo = json!({ "resultado": "nada" });
        assert!(extrair_linhas_json(&corpo, Some("resultado")).is_err());
    }

    #[test]
    fn quadro_montado_com_todas_as_linhas() {
        let (colunas, linhas) =
            fatiar_delimitado("Uf;Qt\nAC;1\nAC;2\nAM;3", 0, 0, ';').unwrap();
        let registros = registros_delimitados(&colunas, linhas);
        let quadro = linhas_para_quadro(&registros).unwrap();
        assert_eq!(quadro.height(), 3);
        assert!(quadro.column("Uf").is_ok());
        assert!(quadro.column("Qt").is_ok());
    }

    #[test]
    fn registros_vazios_viram_quadro_vazio() {
        let quadro = linhas_para_quadro(&[]).unwrap();
        assert_eq!(quadro.height(), 0);
    }
}
