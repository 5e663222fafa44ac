//! # Carga no Armazém
//!
//! ## Visão Geral
//! Dentro de uma única transação por unidade: remoção da fatia
//! (período, geografia) já existente na tabela de destino, para recarga
//! idempotente, seguida da inserção em massa da tabela canônica em lotes
//! limitados pelo teto de parâmetros do Postgres.
//! Em modo de teste a transação inteira é desfeita ao final.
//!
//! O nome da tabela de destino é uma chave textual `schema.tabela` vinda da
//! agenda; como identificadores não são parametrizáveis, o nome é validado
//! caractere a caractere antes de entrar no SQL.

use polars::prelude::{AnyValue, DataFrame};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use crate::errors::PipelineError;
use crate::models::UnidadeTrabalho;

/// Teto folgado sob o limite de 65535 parâmetros por comando do Postgres.
const LIMITE_PARAMETROS: usize = 60_000;

/// Colunas-chave da fatia recarregável, sempre presentes na canônica.
const CHAVES_RECARGA: [&str; 2] = ["periodo", "geografia"];

/// Valor de célula pronto para vinculação SQL.
#[derive(Debug, Clone, PartialEq)]
enum ValorSql {
    Nulo,
    Texto(String),
    Inteiro(i64),
    Decimal(f64),
    Logico(bool),
}

/// Carrega a tabela canônica na tabela de destino da unidade.
///
/// Retorna o número de linhas inseridas. Violações de restrição propagam
/// como `Carga`: fatais para a unidade, sem repetição.
pub async fn carregar(
    pool: &PgPool,
    unidade: &UnidadeTrabalho,
    canonica: &DataFrame,
    modo_teste: bool,
) -> Result<u64, PipelineError> {
    validar_identificador(&unidade.tabela_destino)?;

    let (colunas, linhas) = valores_do_quadro(canonica)?;
    for coluna in &colunas {
        validar_identificador(coluna)?;
    }

    let mut tx = pool.begin().await.map_err(PipelineError::Carga)?;

    let removidas = sqlx::query(&format!(
        "DELETE FROM {} WHERE periodo = $1 AND geografia = $2",
        unidade.tabela_destino
    ))
    .bind(&unidade.competencia)
    .bind(&unidade.geografia)
    .execute(&mut *tx)
    .await
    .map_err(PipelineError::Carga)?
    .rows_affected();

    if removidas > 0 {
        info!(
            tabela = unidade.tabela_destino,
            removidas, "fatia anterior removida para recarga"
        );
    }

    let lote = linhas_por_lote(colunas.len());
    for bloco in linhas.chunks(lote) {
        let mut construtor: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            unidade.tabela_destino,
            colunas.join(", ")
        ));

        construtor.push_values(bloco, |mut vinculos, linha| {
            for valor in linha {
                match valor {
                    ValorSql::Nulo => vinculos.push_bind(Option::<String>::None),
                    ValorSql::Texto(texto) => vinculos.push_bind(texto.clone()),
                    ValorSql::Inteiro(inteiro) => vinculos.push_bind(*inteiro),
                    ValorSql::Decimal(decimal) => vinculos.push_bind(*decimal),
                    ValorSql::Logico(logico) => vinculos.push_bind(*logico),
                };
            }
        });

        construtor
            .build()
            .execute(&mut *tx)
            .await
            .map_err(PipelineError::Carga)?;
    }

    if modo_teste {
        tx.rollback().await.map_err(PipelineError::Carga)?;
        info!(
            tabela = unidade.tabela_destino,
            "modo de teste: transação desfeita"
        );
    } else {
        tx.commit().await.map_err(PipelineError::Carga)?;
    }

    Ok(linhas.len() as u64)
}

fn linhas_por_lote(colunas: usize) -> usize {
    (LIMITE_PARAMETROS / colunas.max(1)).max(1)
}

/// Identificadores SQL aceitos: letras, dígitos, `_` e o ponto de
/// `schema.tabela`; nunca começando por dígito ou ponto.
fn validar_identificador(nome: &str) -> Result<(), PipelineError> {
    let valido = !nome.is_empty()
        && !nome.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && nome
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');

    if !valido {
        return Err(PipelineError::Configuracao(format!(
            "identificador SQL inválido: '{}'",
            nome
        )));
    }
    Ok(())
}

/// Materializa o DataFrame como (nomes de colunas, linhas de valores SQL).
fn valores_do_quadro(
    quadro: &DataFrame,
) -> Result<(Vec<String>, Vec<Vec<ValorSql>>), PipelineError> {
    let colunas: Vec<String> = quadro
        .get_column_names()
        .iter()
        .map(|nome| nome.to_string())
        .collect();

    for chave in CHAVES_RECARGA {
        if !colunas.iter().any(|c| c == chave) {
            return Err(PipelineError::Configuracao(format!(
                "tabela canônica sem a coluna-chave '{}'",
                chave
            )));
        }
    }

    let series: Vec<_> = quadro
        .get_columns()
        .iter()
        .map(|coluna| coluna.as_materialized_series())
        .collect();

    let mut linhas = Vec::with_capacity(quadro.height());
    for indice in 0..quadro.height() {
        let mut linha = Vec::with_capacity(series.len());
        for serie in &series {
            let celula = serie.get(indice).map_err(PipelineError::Quadro)?;
            linha.push(valor_sql(&celula, serie.name().as_str())?);
        }
        linhas.push(linha);
    }

    Ok((colunas, linhas))
}

fn valor_sql(celula: &AnyValue, coluna: &str) -> Result<ValorSql, PipelineError> {
    let valor = match celula {
        AnyValue::Null => ValorSql::Nulo,
        AnyValue::Boolean(v) => ValorSql::Logico(*v),
        AnyValue::String(v) => ValorSql::Texto((*v).to_string()),
        AnyValue::StringOwned(v) => ValorSql::Texto(v.to_string()),
        AnyValue::Int8(v) => ValorSql::Inteiro(i64::from(*v)),
        AnyValue::Int16(v) => ValorSql::Inteiro(i64::from(*v)),
        AnyValue::Int32(v) => ValorSql::Inteiro(i64::from(*v)),
        AnyValue::Int64(v) => ValorSql::Inteiro(*v),
        AnyValue::UInt8(v) => ValorSql::Inteiro(i64::from(*v)),
        AnyValue::UInt16(v) => ValorSql::Inteiro(i64::from(*v)),
        AnyValue::UInt32(v) => ValorSql::Inteiro(i64::from(*v)),
        AnyValue::Float32(v) => ValorSql::Decimal(f64::from(*v)),
        AnyValue::Float64(v) => ValorSql::Decimal(*v),
        outro => {
            return Err(PipelineError::Configuracao(format!(
                "tipo sem suporte na carga da coluna '{}': {:?}",
                coluna, outro
            )));
        }
    };
    Ok(valor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn quadro_materializado_por_tipo() {
        let quadro = df!(
            "periodo" => ["202406", "202406"],
            "geografia" => ["120001", "120001"],
            "quantidade" => [Some(10i64), None],
            "cobertura" => [87.5f64, 100.0],
        )
        .unwrap();

        let (colunas, linhas) = valores_do_quadro(&quadro).unwrap();
        assert_eq!(colunas, vec!["periodo", "geografia", "quantidade", "cobertura"]);
        assert_eq!(linhas.len(), 2);
        assert_eq!(linhas[0][2], ValorSql::Inteiro(10));
        assert_eq!(linhas[1][2], ValorSql::Nulo);
        assert_eq!(linhas[0][3], ValorSql::Decimal(87.5));
        assert_eq!(linhas[0][0], ValorSql::Texto("202406".to_string()));
    }

    #[test]
    fn quadro_sem_chaves_de_recarga_e_rejeitado() {
        let quadro = df!("quantidade" => [1i64]).unwrap();
        let erro = valores_do_quadro(&quadro).unwrap_err();
        assert!(matches!(erro, PipelineError::Configuracao(_)));
    }

    #[test]
    fn identificadores_validados() {
        validar_identificador("saude.producao_profissionais").unwrap();
        validar_identificador("quantidade").unwrap();

        assert!(validar_identificador("").is_err());
        assert!(validar_identificador("1tabela").is_err());
        assert!(validar_identificador(".oculto").is_err());
        assert!(validar_identificador("tabela; DROP TABLE x").is_err());
        assert!(validar_identificador("tabela--comentario").is_err());
    }

    #[test]
    fn lote_respeita_o_teto_de_parametros() {
        assert_eq!(linhas_por_lote(6), 10_000);
        assert_eq!(linhas_por_lote(0), LIMITE_PARAMETROS);
        // nunca zero, mesmo com tabelas largas
        assert_eq!(linhas_por_lote(100_000), 1);
    }
}
