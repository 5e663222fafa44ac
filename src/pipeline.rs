//! # Motor de Unidade de Trabalho
//!
//! ## Visão Geral
//! Conduz uma unidade pela sequência extração → transformação → validação →
//! carga, registrando a transição de estado em cada fronteira. O desfecho é
//! um valor: a orquestração decide o que registrar no armazém, e nenhuma
//! falha de unidade aborta a corrida.
//!
//! ## Atomização
//! A tabela bruta é preservada em disco (Parquet) antes da transformação e
//! removida apenas quando a unidade conclui com sucesso; em caso de falha o
//! estágio fica disponível para diagnóstico.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use reqwest::Client;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::carregador;
use crate::errors::{ExtracaoError, PipelineError};
use crate::extrator;
use crate::models::{Relatorio, UnidadeTrabalho};
use crate::transformador;
use crate::validador;

/// Estados percorridos por uma unidade; usados nos logs de fronteira.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstadoUnidade {
    Pendente,
    Extraindo,
    Extraida,
    Transformando,
    Transformada,
    Validando,
    Validada,
    Carregando,
}

impl fmt::Display for EstadoUnidade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            EstadoUnidade::Pendente => "PENDENTE",
            EstadoUnidade::Extraindo => "EXTRAINDO",
            EstadoUnidade::Extraida => "EXTRAIDA",
            EstadoUnidade::Transformando => "TRANSFORMANDO",
            EstadoUnidade::Transformada => "TRANSFORMADA",
            EstadoUnidade::Validando => "VALIDANDO",
            EstadoUnidade::Validada => "VALIDADA",
            EstadoUnidade::Carregando => "CARREGANDO",
        };
        f.write_str(nome)
    }
}

/// Desfecho terminal de uma unidade.
#[derive(Debug)]
pub enum Desfecho {
    /// Sucesso: agenda avança, histórico registrado.
    Carregada {
        linhas: u64,
        sem_dados: usize,
        falhas_itens: usize,
    },
    /// A fonte ainda não publicou a competência pedida.
    CompetenciaIndisponivel { detalhe: String },
    FalhaExtracao { detalhe: String },
    FalhaTransformacao { detalhe: String },
    FalhaValidacao { detalhe: String },
    FalhaCarga { detalhe: String },
}

impl Desfecho {
    pub fn sucesso(&self) -> bool {
        matches!(self, Desfecho::Carregada { .. })
    }

    /// Etapa gravada na tabela de erros do armazém.
    pub fn etapa(&self) -> &'static str {
        match self {
            Desfecho::Carregada { .. } => "carga",
            Desfecho::CompetenciaIndisponivel { .. } => "competencia_indisponivel",
            Desfecho::FalhaExtracao { .. } => "extracao",
            Desfecho::FalhaTransformacao { .. } => "transformacao",
            Desfecho::FalhaValidacao { .. } => "validacao",
            Desfecho::FalhaCarga { .. } => "carga",
        }
    }

    pub fn detalhe(&self) -> Option<&str> {
        match self {
            Desfecho::Carregada { .. } => None,
            Desfecho::CompetenciaIndisponivel { detalhe }
            | Desfecho::FalhaExtracao { detalhe }
            | Desfecho::FalhaTransformacao { detalhe }
            | Desfecho::FalhaValidacao { detalhe }
            | Desfecho::FalhaCarga { detalhe } => Some(detalhe),
        }
    }
}

/// Executa uma unidade de ponta a ponta e devolve o desfecho.
pub async fn executar(
    cliente: &Client,
    pool: &PgPool,
    relatorio: &Relatorio,
    unidade: &UnidadeTrabalho,
    modo_teste: bool,
    dir_dados: &Path,
) -> Desfecho {
    info!(
        operacao = unidade.operacao,
        periodo = unidade.competencia,
        geografia = unidade.geografia,
        estado = %EstadoUnidade::Extraindo,
        "unidade iniciada"
    );

    let mut coleta = match extrator::extrair(cliente, relatorio, unidade).await {
        Ok(coleta) => coleta,
        Err(PipelineError::Aquisicao(ExtracaoError::CompetenciaIndisponivel {
            competencia,
        })) => {
            return Desfecho::CompetenciaIndisponivel {
                detalhe: format!("competência {} ainda não publicada", competencia),
            };
        }
        Err(erro) => {
            return Desfecho::FalhaExtracao {
                detalhe: erro.to_string(),
            };
        }
    };

    info!(
        estado = %EstadoUnidade::Extraida,
        linhas = coleta.tabela.height(),
        sem_dados = coleta.sem_dados.len(),
        falhas_itens = coleta.falhas.len(),
        "extração concluída"
    );

    if coleta.tabela.height() == 0 {
        return Desfecho::FalhaExtracao {
            detalhe: format!(
                "nenhuma linha extraída ({} itens sem dados, {} itens com falha)",
                coleta.sem_dados.len(),
                coleta.falhas.len()
            ),
        };
    }

    let estagio = match preservar_bruta(dir_dados, unidade, &mut coleta.tabela) {
        Ok(caminho) => Some(caminho),
        Err(erro) => {
            warn!(erro = %erro, "bruta não preservada em disco; seguindo sem estágio");
            None
        }
    };

    info!(estado = %EstadoUnidade::Transformando, "transformação iniciada");
    let canonica =
        match transformador::transformar(&coleta.tabela, &relatorio.transformacao, unidade) {
            Ok(canonica) => canonica,
            Err(erro) => {
                return Desfecho::FalhaTransformacao {
                    detalhe: erro.to_string(),
                };
            }
        };
    info!(
        estado = %EstadoUnidade::Transformada,
        linhas = canonica.height(),
        colunas = canonica.width(),
        "transformação concluída"
    );

    info!(estado = %EstadoUnidade::Validando, "checklist iniciado");
    if let Err(erro) = validador::validar(&coleta.tabela, &canonica, &relatorio.verificacoes) {
        return Desfecho::FalhaValidacao {
            detalhe: erro.to_string(),
        };
    }
    info!(
        estado = %EstadoUnidade::Validada,
        verificacoes = relatorio.verificacoes.len(),
        "checklist concluído"
    );

    info!(estado = %EstadoUnidade::Carregando, tabela = unidade.tabela_destino, "carga iniciada");
    let linhas = match carregador::carregar(pool, unidade, &canonica, modo_teste).await {
        Ok(linhas) => linhas,
        Err(erro) => {
            return Desfecho::FalhaCarga {
                detalhe: erro.to_string(),
            };
        }
    };

    // Estágio limpo apenas depois do sucesso
    if let Some(caminho) = estagio
        && let Err(erro) = fs::remove_file(&caminho)
    {
        warn!(caminho = %caminho.display(), erro = %erro, "estágio não removido");
    }

    Desfecho::Carregada {
        linhas,
        sem_dados: coleta.sem_dados.len(),
        falhas_itens: coleta.falhas.len(),
    }
}

/// Grava a tabela bruta como Parquet em `dados/{operacao}/`.
fn preservar_bruta(
    dir_dados: &Path,
    unidade: &UnidadeTrabalho,
    bruta: &mut DataFrame,
) -> Result<PathBuf, PipelineError> {
    let dir_operacao = dir_dados.join(&unidade.operacao);
    fs::create_dir_all(&dir_operacao).map_err(PipelineError::Io)?;

    let caminho = dir_operacao.join(format!(
        "{}_{}.parquet",
        unidade.competencia, unidade.geografia
    ));
    let arquivo = File::create(&caminho).map_err(PipelineError::Io)?;

    let stats_options = StatisticsOptions {
        min_value: true,
        max_value: true,
        null_count: true,
        distinct_count: false,
    };

    ParquetWriter::new(arquivo)
        .with_compression(ParquetCompression::Snappy)
        .with_statistics(stats_options)
        .finish(bruta)
        .map_err(PipelineError::Quadro)?;

    Ok(caminho)
}
