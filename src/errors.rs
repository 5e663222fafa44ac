//! # Definição de Erros do Pipeline
//!
//! Este módulo centraliza as falhas possíveis durante a captura e a carga.
//!
//! # Error Handling Strategy
//! - **Tipagem:** Enums para tratamento exaustivo.
//! - **Extensibilidade:** Marcados como `non_exhaustive` para permitir evolução sem quebra de contrato.
//! - **Recuperação local:** falhas de um único item de extração NÃO são erros;
//!   são colecionadas como valores (`extrator::FalhaItem`) e a captura continua.

/// Falhas da camada de rede/decodificação (um pedido HTTP, um corpo).
#[derive(Debug)]
#[non_exhaustive]
pub enum ExtracaoError {
    /// Falha na conexão, DNS, timeout ou handshake TLS.
    Rede(reqwest::Error),

    /// O servidor respondeu, mas com status HTTP de erro.
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    /// A página do portal não contém o campo oculto de sessão esperado
    /// (layout do site mudou, ou a sessão foi recusada).
    Sessao(String),

    /// O servidor respondeu com sucesso, mas sem nenhum byte útil.
    CorpoVazio,

    /// A competência pedida ainda não foi publicada pela fonte.
    /// Distinta de uma falha de item: invalida a unidade inteira, porque
    /// não existe base de comparação para os indicadores.
    CompetenciaIndisponivel { competencia: String },

    /// Corpo recebido, mas fora do formato esperado (JSON inválido,
    /// campo ausente, tabela delimitada sem cabeçalho).
    Decodificacao(String),
}

/// Enumeração central de falhas de uma unidade de trabalho.
///
/// O atributo `#[non_exhaustive]` garante compatibilidade futura,
/// instruindo o compilador a exigir tratamento de variantes desconhecidas.
#[derive(Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// Catálogo de relatórios ausente, inválido ou incompleto.
    Configuracao(String),

    /// Falhas no sistema de arquivos (permissão, disco cheio).
    /// Encapsula `std::io::Error`.
    Io(std::io::Error),

    /// Erros originados na engine de DataFrames.
    Quadro(polars::prelude::PolarsError),

    /// Falha de rede/sessão anterior a qualquer dado útil; fatal para a unidade.
    Aquisicao(ExtracaoError),

    /// Invariante pós-transformação violada (paridade de contagem/soma,
    /// piso de sanidade). Nada é carregado.
    Validacao(String),

    /// Violação de restrição ou falha de conectividade no armazém.
    Carga(sqlx::Error),
}
