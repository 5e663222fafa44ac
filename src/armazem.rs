//! # Armazém: Agenda, Histórico e Registro de Erros
//!
//! ## Visão Geral
//! Uma única sessão de banco por corrida, reutilizada por todas as unidades.
//! A agenda (`etl.agenda`) diz o que capturar; o histórico
//! (`etl.historico_captura`) evita recaptura do que já foi concluído; a
//! tabela de erros (`etl.erros`) dá ao operador o detalhe das unidades que
//! falharam nestes trabalhos desassistidos.
//!
//! O DDL correspondente vive em `sql/esquema.sql`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use crate::errors::PipelineError;
use crate::models::UnidadeTrabalho;

/// Uma linha da agenda: um alvo de captura ainda pendente.
#[derive(Debug, sqlx::FromRow)]
pub struct EntradaAgenda {
    pub operacao: String,
    pub periodo: String,
    pub geografia: String,
    pub tabela_destino: String,
    pub ultima_captura: Option<DateTime<Utc>>,
}

impl From<EntradaAgenda> for UnidadeTrabalho {
    fn from(entrada: EntradaAgenda) -> Self {
        UnidadeTrabalho {
            operacao: entrada.operacao,
            competencia: entrada.periodo,
            geografia: entrada.geografia,
            tabela_destino: entrada.tabela_destino,
        }
    }
}

/// Abre a sessão única da corrida a partir de `DATABASE_URL`.
pub async fn conectar() -> Result<PgPool, PipelineError> {
    let url = std::env::var("DATABASE_URL").map_err(|_| {
        PipelineError::Configuracao("variável DATABASE_URL ausente".to_string())
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .map_err(PipelineError::Carga)?;

    Ok(pool)
}

/// Entradas da agenda sem captura registrada, em ordem de agenda.
/// `operacao` restringe a corrida a uma única operação quando presente.
pub async fn agenda_pendente(
    pool: &PgPool,
    operacao: Option<&str>,
) -> Result<Vec<EntradaAgenda>, PipelineError> {
    let entradas = sqlx::query_as::<_, EntradaAgenda>(
        r#"
        SELECT a.operacao, a.periodo, a.geografia, a.tabela_destino, a.ultima_captura
        FROM etl.agenda a
        LEFT JOIN etl.historico_captura h
               ON h.operacao = a.operacao
              AND h.periodo = a.periodo
              AND h.geografia = a.geografia
        WHERE h.operacao IS NULL
          AND ($1::text IS NULL OR a.operacao = $1)
        ORDER BY a.operacao, a.periodo, a.geografia
        "#,
    )
    .bind(operacao)
    .fetch_all(pool)
    .await
    .map_err(PipelineError::Carga)?;

    Ok(entradas)
}

/// Registra a conclusão de uma unidade no histórico de captura.
pub async fn registrar_captura(
    pool: &PgPool,
    unidade: &UnidadeTrabalho,
    linhas: u64,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO etl.historico_captura (operacao, periodo, geografia, linhas, capturado_em)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (operacao, periodo, geografia)
        DO UPDATE SET linhas = EXCLUDED.linhas, capturado_em = EXCLUDED.capturado_em
        "#,
    )
    .bind(&unidade.operacao)
    .bind(&unidade.competencia)
    .bind(&unidade.geografia)
    .bind(linhas as i64)
    .execute(pool)
    .await
    .map_err(PipelineError::Carga)?;

    Ok(())
}

/// Avança o marcador de última captura da entrada de agenda.
pub async fn avancar_agenda(
    pool: &PgPool,
    unidade: &UnidadeTrabalho,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE etl.agenda
        SET ultima_captura = now()
        WHERE operacao = $1 AND periodo = $2 AND geografia = $3
        "#,
    )
    .bind(&unidade.operacao)
    .bind(&unidade.competencia)
    .bind(&unidade.geografia)
    .execute(pool)
    .await
    .map_err(PipelineError::Carga)?;

    Ok(())
}

/// Persiste o detalhe de uma falha para visibilidade do operador.
/// A agenda não avança; a unidade volta a ser elegível na próxima corrida.
pub async fn registrar_erro(
    pool: &PgPool,
    unidade: &UnidadeTrabalho,
    etapa: &str,
    detalhe: &str,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO etl.erros (operacao, periodo, geografia, etapa, detalhe, ocorrido_em)
        VALUES ($1, $2, $3, $4, $5, now())
        "#,
    )
    .bind(&unidade.operacao)
    .bind(&unidade.competencia)
    .bind(&unidade.geografia)
    .bind(etapa)
    .bind(detalhe)
    .execute(pool)
    .await
    .map_err(PipelineError::Carga)?;

    Ok(())
}
