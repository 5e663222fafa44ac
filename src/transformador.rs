//! # Normalização da Tabela Bruta
//!
//! ## Visão Geral
//! Função pura da tabela bruta para a canônica, dirigida inteiramente pela
//! configuração do relatório: descarte de colunas da fonte, renomeação para
//! o vocabulário do destino, coerção de tipos declarada e colunas derivadas.
//! Sem rede e sem banco.
//!
//! Distinção deliberada na coerção: string vazia só vira nulo sob coerção
//! numérica; em colunas de texto, vazio permanece vazio.

use polars::prelude::*;

use crate::errors::PipelineError;
use crate::models::{Derivada, Tipo, Transformacao, UnidadeTrabalho};

/// Produz a tabela canônica de uma unidade.
pub fn transformar(
    bruta: &DataFrame,
    cfg: &Transformacao,
    unidade: &UnidadeTrabalho,
) -> Result<DataFrame, PipelineError> {
    let mut quadro = bruta.clone();

    // Limpeza de colunas técnicas da fonte
    for coluna in &cfg.remover {
        if quadro.column(coluna).is_ok() {
            quadro = quadro.drop(coluna)?;
        }
    }

    // Renomeação estrita: coluna esperada ausente é desvio de esquema da
    // fonte e deve falhar aqui, não no armazém.
    for (antigo, novo) in &cfg.renomear {
        quadro.rename(antigo, novo.as_str().into())?;
    }

    let mut lf = quadro.lazy();

    if let Some(coluna) = &cfg.filtro_geografia {
        lf = lf.filter(
            col(coluna.as_str())
                .cast(DataType::String)
                .eq(lit(unidade.geografia.as_str())),
        );
    }

    let coercoes: Vec<Expr> = cfg
        .tipos
        .iter()
        .map(|(coluna, tipo)| expr_coercao(coluna, *tipo))
        .collect();
    if !coercoes.is_empty() {
        lf = lf.with_columns(coercoes);
    }

    let derivadas: Vec<Expr> = cfg.derivadas.iter().map(expr_derivada).collect();
    if !derivadas.is_empty() {
        lf = lf.with_columns(derivadas);
    }

    lf.collect().map_err(PipelineError::Quadro)
}

fn expr_coercao(coluna: &str, tipo: Tipo) -> Expr {
    let texto = col(coluna).cast(DataType::String);

    match tipo {
        Tipo::Texto => texto.alias(coluna),

        Tipo::Inteiro => when(texto.clone().eq(lit("")))
            .then(lit(NULL))
            .otherwise(texto)
            .cast(DataType::Int64)
            .alias(coluna),

        // Fontes brasileiras usam vírgula decimal
        Tipo::Decimal => when(texto.clone().eq(lit("")))
            .then(lit(NULL))
            .otherwise(texto.str().replace_all(lit(","), lit("."), true))
            .cast(DataType::Float64)
            .alias(coluna),
    }
}

fn expr_derivada(derivada: &Derivada) -> Expr {
    match derivada {
        Derivada::Concatenar {
            nome,
            colunas,
            separador,
        } => {
            let partes: Vec<Expr> = colunas
                .iter()
                .map(|c| col(c.as_str()).cast(DataType::String))
                .collect();
            concat_str(partes, separador, true).alias(nome.as_str())
        }

        Derivada::Percentual { coluna } => {
            let base = col(coluna.as_str()).cast(DataType::Float64);
            when(base.clone().lt(lit(0.0)))
                .then(lit(0.0))
                .when(base.clone().gt(lit(100.0)))
                .then(lit(100.0))
                .otherwise(base)
                .alias(coluna.as_str())
        }
    }
}
