//! Implementações de traits para os enums de erro do sistema
//!
//! Este módulo existe exclusivamente para desacoplar:
//! - definição de erros (enums)
//! - implementação de traits (`Display`, `Error`, `From`)

use std::error::Error as StdError;
use std::fmt;

use crate::errors::{ExtracaoError, PipelineError};

/* ========================================================================== */
/* Display                                                                    */
/* ========================================================================== */

impl fmt::Display for ExtracaoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtracaoError::Rede(err) => {
                write!(f, "[Rede] {}", err)
            }

            ExtracaoError::Status { status, url } => {
                write!(f, "[HTTP {}] {}", status, url)
            }

            ExtracaoError::Sessao(msg) => {
                write!(f, "[Sessão] {}", msg)
            }

            ExtracaoError::CorpoVazio => {
                write!(f, "[Corpo] resposta sem conteúdo útil")
            }

            ExtracaoError::CompetenciaIndisponivel { competencia } => {
                write!(f, "[Competência] {} ainda não publicada pela fonte", competencia)
            }

            ExtracaoError::Decodificacao(msg) => {
                write!(f, "[Decodificação] {}", msg)
            }
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Configuracao(msg) => {
                write!(f, "[Configuração] {}", msg)
            }

            PipelineError::Io(err) => {
                write!(f, "[I/O] {}", err)
            }

            PipelineError::Quadro(err) => {
                write!(f, "[Quadro] {}", err)
            }

            PipelineError::Aquisicao(err) => {
                write!(f, "[Aquisição] {}", err)
            }

            PipelineError::Validacao(msg) => {
                write!(f, "[Validação] {}", msg)
            }

            PipelineError::Carga(err) => {
                write!(f, "[Carga] {}", err)
            }
        }
    }
}

/* ========================================================================== */
/* std::error::Error                                                          */
/* ========================================================================== */

impl StdError for ExtracaoError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExtracaoError::Rede(err) => Some(err),
            _ => None,
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PipelineError::Io(err) => Some(err),
            PipelineError::Quadro(err) => Some(err),
            PipelineError::Aquisicao(err) => Some(err),
            PipelineError::Carga(err) => Some(err),
            _ => None,
        }
    }
}

/* ========================================================================== */
/* Conversions                                                                */
/* ========================================================================== */

impl From<reqwest::Error> for ExtracaoError {
    fn from(err: reqwest::Error) -> Self {
        ExtracaoError::Rede(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl From<polars::prelude::PolarsError> for PipelineError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        PipelineError::Quadro(err)
    }
}

impl From<ExtracaoError> for PipelineError {
    fn from(err: ExtracaoError) -> Self {
        PipelineError::Aquisicao(err)
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Carga(err)
    }
}

/* ========================================================================== */
/* Box<dyn Error>                                                             */
/* ========================================================================== */

// A conversão `PipelineError -> Box<dyn StdError>` já é fornecida pela
// implementação genérica da biblioteca padrão (`impl<E: StdError> From<E> for
// Box<dyn StdError>`), pois `PipelineError` implementa `StdError` acima.
