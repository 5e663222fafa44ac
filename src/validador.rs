//! # Validação de Integridade
//!
//! Reconfere agregados entre a tabela bruta e a canônica antes de qualquer
//! carga: paridade de contagens distintas, paridade de somas com tolerância,
//! pisos de sanidade, ausência de nulos e de quantidades negativas. A
//! primeira verificação que falha aborta a unidade com mensagem descritiva;
//! nada é repetido automaticamente; o desfecho sobe para a orquestração.

use polars::prelude::*;

use crate::errors::PipelineError;
use crate::models::Verificacao;

const TOLERANCIA_SOMA: f64 = 1e-6;

/// Executa o checklist configurado sobre (bruta, canônica).
pub fn validar(
    bruta: &DataFrame,
    canonica: &DataFrame,
    verificacoes: &[Verificacao],
) -> Result<(), PipelineError> {
    for verificacao in verificacoes {
        match verificacao {
            Verificacao::ParidadeDistintos {
                coluna_bruta,
                coluna_canonica,
            } => {
                let antes = distintos(bruta, coluna_bruta)?;
                let depois = distintos(canonica, coluna_canonica)?;
                if antes != depois {
                    return Err(PipelineError::Validacao(format!(
                        "paridade de distintos violada: '{}' tem {} na bruta, '{}' tem {} na canônica",
                        coluna_bruta, antes, coluna_canonica, depois
                    )));
                }
            }

            Verificacao::ParidadeSoma {
                coluna_bruta,
                coluna_canonica,
            } => {
                let antes = soma(bruta, coluna_bruta)?;
                let depois = soma(canonica, coluna_canonica)?;
                if (antes - depois).abs() > TOLERANCIA_SOMA {
                    return Err(PipelineError::Validacao(format!(
                        "paridade de soma violada: '{}' soma {} na bruta, '{}' soma {} na canônica",
                        coluna_bruta, antes, coluna_canonica, depois
                    )));
                }
            }

            Verificacao::MinimoDistintos { coluna, minimo } => {
                let contagem = distintos(bruta, coluna)?;
                if contagem < *minimo {
                    return Err(PipelineError::Validacao(format!(
                        "piso de sanidade violado: '{}' tem {} valores distintos (mínimo {})",
                        coluna, contagem, minimo
                    )));
                }
            }

            Verificacao::SemNulos { colunas } => {
                for coluna in colunas {
                    let nulos = canonica.column(coluna)?.null_count();
                    if nulos > 0 {
                        return Err(PipelineError::Validacao(format!(
                            "coluna-chave '{}' com {} nulos na canônica",
                            coluna, nulos
                        )));
                    }
                }
            }

            Verificacao::SemNegativos { coluna } => {
                let serie = canonica
                    .column(coluna)?
                    .as_materialized_series()
                    .cast(&DataType::Float64)?;
                if let Some(minimo) = serie.min::<f64>()?
                    && minimo < 0.0
                {
                    return Err(PipelineError::Validacao(format!(
                        "quantidade negativa em '{}': mínimo {}",
                        coluna, minimo
                    )));
                }
            }
        }
    }

    Ok(())
}

fn distintos(quadro: &DataFrame, coluna: &str) -> Result<usize, PipelineError> {
    Ok(quadro
        .column(coluna)?
        .as_materialized_series()
        .n_unique()?)
}

/// Soma como decimal; colunas brutas costumam chegar como texto.
fn soma(quadro: &DataFrame, coluna: &str) -> Result<f64, PipelineError> {
    let serie = quadro
        .column(coluna)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    Ok(serie.sum::<f64>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bruta() -> DataFrame {
        df!(
            "Municipio" => ["120001", "120020", "120040"],
            "Qt" => ["10", "5", "1"],
        )
        .unwrap()
    }

    fn canonica() -> DataFrame {
        df!(
            "municipio" => ["120001", "120020", "120040"],
            "quantidade" => [10i64, 5, 1],
        )
        .unwrap()
    }

    #[test]
    fn checklist_completo_passa() {
        let verificacoes = vec![
            Verificacao::ParidadeDistintos {
                coluna_bruta: "Municipio".to_string(),
                coluna_canonica: "municipio".to_string(),
            },
            Verificacao::ParidadeSoma {
                coluna_bruta: "Qt".to_string(),
                coluna_canonica: "quantidade".to_string(),
            },
            Verificacao::MinimoDistintos {
                coluna: "Municipio".to_string(),
                minimo: 3,
            },
            Verificacao::SemNulos {
                colunas: vec!["municipio".to_string()],
            },
            Verificacao::SemNegativos {
                coluna: "quantidade".to_string(),
            },
        ];

        validar(&bruta(), &canonica(), &verificacoes).unwrap();
    }

    #[test]
    fn piso_de_municipios_aborta_antes_da_carga() {
        let verificacoes = vec![Verificacao::MinimoDistintos {
            coluna: "Municipio".to_string(),
            minimo: 5000,
        }];

        let erro = validar(&bruta(), &canonica(), &verificacoes).unwrap_err();
        assert!(matches!(erro, PipelineError::Validacao(_)));
        let mensagem = erro.to_string();
        assert!(mensagem.contains("3"), "mensagem deve citar a contagem: {mensagem}");
        assert!(mensagem.contains("5000"));
    }

    #[test]
    fn soma_divergente_falha() {
        let canonica = df!(
            "municipio" => ["120001", "120020", "120040"],
            "quantidade" => [10i64, 5, 2],
        )
        .unwrap();
        let verificacoes = vec![Verificacao::ParidadeSoma {
            coluna_bruta: "Qt".to_string(),
            coluna_canonica: "quantidade".to_string(),
        }];

        assert!(validar(&bruta(), &canonica, &verificacoes).is_err());
    }

    #[test]
    fn distintos_divergentes_falham() {
        let canonica = df!(
            "municipio" => ["120001", "120001", "120040"],
            "quantidade" => [10i64, 5, 1],
        )
        .unwrap();
        let verificacoes = vec![Verificacao::ParidadeDistintos {
            coluna_bruta: "Municipio".to_string(),
            coluna_canonica: "municipio".to_string(),
        }];

        assert!(validar(&bruta(), &canonica, &verificacoes).is_err());
    }

    #[test]
    fn nulo_em_coluna_chave_falha() {
        let canonica = df!(
            "municipio" => [Some("120001"), None, Some("120040")],
            "quantidade" => [10i64, 5, 1],
        )
        .unwrap();
        let verificacoes = vec![Verificacao::SemNulos {
            colunas: vec!["municipio".to_string()],
        }];

        assert!(validar(&bruta(), &canonica, &verificacoes).is_err());
    }

    #[test]
    fn quantidade_negativa_falha() {
        let canonica = df!(
            "municipio" => ["120001"],
            "quantidade" => [-1i64],
        )
        .unwrap();
        let verificacoes = vec![Verificacao::SemNegativos {
            coluna: "quantidade".to_string(),
        }];

        assert!(validar(&bruta(), &canonica, &verificacoes).is_err());
    }

    #[test]
    fn checklist_vazio_sempre_passa() {
        validar(&bruta(), &canonica(), &[]).unwrap();
    }
}
