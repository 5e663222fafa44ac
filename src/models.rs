//! Metadata-Driven Report Catalog
//!
//! ## Visão Geral
//! Este módulo define as estruturas de configuração do pipeline de captura.
//! Cada relatório é uma entrada declarativa (modelo de endpoint, mapas de
//! colunas, mapa de tipos, checklist de verificações) consumida por um único
//! motor genérico; nenhum relatório tem fluxo de controle próprio.
//!
//! ## Boas Práticas
//! - **Encapsulamento**: Validações de integridade ocorrem no momento da carga.
//! - **Extensibilidade**: O uso de `flatten` permite adicionar novos relatórios ao TOML
//!   sem quebrar a compatibilidade de tipos.

use crate::errors::PipelineError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Catálogo de relatórios.
// Mapeia o id da operação (ex: "producao_profissionais") para a sua configuração.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(flatten)]
    pub relatorios: HashMap<String, Relatorio>,
}

/// Uma unidade de trabalho: um alvo de captura, imutável, consumido uma vez.
///
/// Produzida pela camada de orquestração a partir da agenda do armazém.
#[derive(Debug, Clone)]
pub struct UnidadeTrabalho {
    /// Id da operação no catálogo.
    pub operacao: String,
    /// Competência/período de referência (ex: "202406").
    pub competencia: String,
    /// Código da unidade geográfica na numeração do armazém.
    pub geografia: String,
    /// Tabela de destino, no formato `schema.tabela`.
    pub tabela_destino: String,
}

/// Configuração de um relatório do catálogo.
#[derive(Debug, Deserialize, Clone)]
pub struct Relatorio {
    /// Modelo de URL do endpoint de dados. Aceita os marcadores
    /// `{geografia}`, `{competencia}` e `{item}`.
    pub url: String,

    /// Forma da fonte: REST com corpo JSON, ou portal com formulário.
    pub fonte: Fonte,

    /// De onde vem a lista de itens da unidade (um pedido HTTP por item).
    #[serde(default)]
    pub itens: Itens,

    /// Nome da coluna sob a qual o código do item é etiquetado nas linhas.
    #[serde(default = "chave_item_padrao")]
    pub chave_item: String,

    /// Total de tentativas por pedido (1 = sem repetição).
    #[serde(default = "tentativas_padrao")]
    pub tentativas: u32,

    #[serde(default)]
    pub transformacao: Transformacao,

    /// Checklist executado entre a tabela bruta e a canônica.
    #[serde(default)]
    pub verificacoes: Vec<Verificacao>,
}

fn chave_item_padrao() -> String {
    "item".to_string()
}

fn tentativas_padrao() -> u32 {
    2
}

/// Forma do corpo devolvido pela fonte.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum Fonte {
    /// Endpoint REST: GET com corpo JSON, lista de registros sob
    /// `root_path` (ou na raiz, se ausente).
    Json {
        #[serde(default)]
        root_path: Option<String>,
    },

    /// Portal renderizado no servidor: GET inicial para obter cookies e o
    /// token de estado, depois POSTs de formulário. O corpo devolvido é
    /// texto delimitado com ruído de cabeçalho e rodapé em contagens fixas.
    Formulario {
        /// Página inicial do portal (origem dos cookies e do token).
        url_sessao: String,
        /// Nome do `<input>` oculto que carrega o token de estado.
        campo_token: String,
        /// Seleções fixas do formulário. Os valores aceitam os mesmos
        /// marcadores do modelo de URL.
        #[serde(default)]
        campos: Vec<CampoFormulario>,
        /// Linhas de preâmbulo antes da linha de nomes de colunas.
        linhas_cabecalho: usize,
        /// Linhas de ruído ao final do corpo.
        linhas_rodape: usize,
        /// Separador de colunas (um único caractere, ex: ";").
        delimitador: String,
    },
}

/// Um campo fixo de formulário (nome → valor).
#[derive(Debug, Deserialize, Clone)]
pub struct CampoFormulario {
    pub nome: String,
    pub valor: String,
}

/// Origem da lista de itens de uma unidade.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum Itens {
    /// Um único item: o próprio código geográfico da unidade.
    #[default]
    Geografia,

    /// Consulta paginada que lista códigos de item (ex: estabelecimentos de
    /// um município). O modelo aceita `{geografia}`, `{competencia}` e
    /// `{pagina}`; a paginação para na primeira página vazia.
    Consulta {
        url: String,
        #[serde(default)]
        root_path: Option<String>,
        /// Campo do registro que carrega o código do item.
        campo_codigo: String,
    },
}

/// Transformação da tabela bruta para a canônica. Puramente declarativa.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Transformacao {
    /// Colunas exclusivas da fonte, descartadas.
    #[serde(default)]
    pub remover: Vec<String>,

    /// Nome na fonte → nome no vocabulário do destino.
    #[serde(default)]
    pub renomear: HashMap<String, String>,

    /// Coerção de tipos declarada por coluna (já renomeada).
    #[serde(default)]
    pub tipos: HashMap<String, Tipo>,

    /// Colunas computadas a partir das existentes.
    #[serde(default)]
    pub derivadas: Vec<Derivada>,

    /// Se presente, mantém apenas linhas cuja coluna indicada é igual ao
    /// código geográfico da unidade (recorte de escopo).
    #[serde(default)]
    pub filtro_geografia: Option<String>,
}

/// Tipos de coluna do esquema de destino.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tipo {
    Texto,
    Inteiro,
    Decimal,
}

/// Coluna derivada.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum Derivada {
    /// Texto composto pela junção de colunas (ex: horários de atendimento).
    Concatenar {
        nome: String,
        colunas: Vec<String>,
        separador: String,
    },

    /// Percentual restringido ao intervalo [0, 100].
    Percentual { coluna: String },
}

/// Uma verificação do checklist do Validador.
///
/// Paridades comparam bruta × canônica; pisos de sanidade leem a bruta;
/// `sem_nulos`/`sem_negativos` leem a canônica.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum Verificacao {
    /// Contagem de valores distintos igual nos dois lados.
    ParidadeDistintos {
        coluna_bruta: String,
        coluna_canonica: String,
    },

    /// Soma da coluna de quantidade igual nos dois lados (tolerância 1e-6).
    ParidadeSoma {
        coluna_bruta: String,
        coluna_canonica: String,
    },

    /// Piso de sanidade: ao menos `minimo` valores distintos na bruta.
    MinimoDistintos { coluna: String, minimo: usize },

    /// Nenhum nulo nas colunas-chave da canônica.
    SemNulos { colunas: Vec<String> },

    /// Nenhuma quantidade negativa na canônica.
    SemNegativos { coluna: String },
}

impl Config {
    /// Carrega e valida o catálogo TOML.
    ///
    /// # Erros
    /// Retorna `PipelineError::Io` se o ficheiro não for encontrado ou
    /// `PipelineError::Configuracao` se a estrutura for inválida.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(PipelineError::Io)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| PipelineError::Configuracao(format!("Erro no TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validação pós-carga (Fail-Fast).
    fn validate(&self) -> Result<(), PipelineError> {
        if self.relatorios.is_empty() {
            return Err(PipelineError::Configuracao(
                "catálogo sem relatórios".to_string(),
            ));
        }

        for (nome, rel) in &self.relatorios {
            if rel.url.is_empty() {
                return Err(PipelineError::Configuracao(format!("'{}' sem url", nome)));
            }
            if rel.tentativas == 0 {
                return Err(PipelineError::Configuracao(format!(
                    "'{}' com tentativas = 0",
                    nome
                )));
            }
            if let Fonte::Formulario {
                url_sessao,
                campo_token,
                delimitador,
                ..
            } = &rel.fonte
            {
                if url_sessao.is_empty() || campo_token.is_empty() {
                    return Err(PipelineError::Configuracao(format!(
                        "'{}' sem url_sessao/campo_token",
                        nome
                    )));
                }
                if delimitador.chars().count() != 1 {
                    return Err(PipelineError::Configuracao(format!(
                        "'{}' com delimitador de {} caracteres (esperado 1)",
                        nome,
                        delimitador.chars().count()
                    )));
                }
            }
            if let Itens::Consulta { url, campo_codigo, .. } = &rel.itens
                && (url.is_empty() || campo_codigo.is_empty())
            {
                return Err(PipelineError::Configuracao(format!(
                    "'{}' com consulta de itens incompleta",
                    nome
                )));
            }
        }
        Ok(())
    }
}

impl Fonte {
    /// Separador da fonte delimitada; `None` para fontes JSON.
    pub fn delimitador(&self) -> Option<char> {
        match self {
            Fonte::Formulario { delimitador, .. } => delimitador.chars().next(),
            Fonte::Json { .. } => None,
        }
    }
}

/// Resolve um modelo de URL/valor substituindo os marcadores informados.
///
/// # Erros
/// `PipelineError::Configuracao` se algum marcador permanecer sem valor:
/// um modelo parcialmente resolvido nunca vira pedido HTTP.
pub fn resolver_modelo(
    modelo: &str,
    valores: &[(&str, &str)],
) -> Result<String, PipelineError> {
    let mut resolvido = modelo.to_string();
    for (marcador, valor) in valores {
        resolvido = resolvido.replace(&format!("{{{}}}", marcador), valor);
    }

    if resolvido.contains('{') {
        return Err(PipelineError::Configuracao(format!(
            "marcador não resolvido em '{}'",
            resolvido
        )));
    }
    Ok(resolvido)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGO: &str = r#"
        [estabelecimentos]
        url = "https://exemplo.gov.br/api/estabelecimentos/{item}?competencia={competencia}"
        chave_item = "estabelecimento"

        [estabelecimentos.fonte]
        tipo = "json"
        root_path = "resultado"

        [estabelecimentos.itens]
        tipo = "consulta"
        url = "https://exemplo.gov.br/api/municipio/{geografia}/estabelecimentos?pagina={pagina}"
        campo_codigo = "codigo"

        [estabelecimentos.transformacao]
        remover = ["links"]

        [estabelecimentos.transformacao.renomear]
        noFantasia = "nome_fantasia"

        [estabelecimentos.transformacao.tipos]
        qt_consultas = "inteiro"

        [[estabelecimentos.verificacoes]]
        tipo = "paridade_distintos"
        coluna_bruta = "geografia"
        coluna_canonica = "geografia"

        [producao]
        url = "https://portal.exemplo.gov.br/relatorio"

        [producao.fonte]
        tipo = "formulario"
        url_sessao = "https://portal.exemplo.gov.br/index.xhtml"
        campo_token = "javax.faces.ViewState"
        linhas_cabecalho = 7
        linhas_rodape = 10
        delimitador = ";"

        [[producao.fonte.campos]]
        nome = "competencia"
        valor = "{competencia}"

        [producao.transformacao]
    "#;

    #[test]
    fn catalogo_completo_carrega() {
        let config: Config = toml::from_str(CATALOGO).unwrap();
        config.validate().unwrap();

        assert_eq!(config.relatorios.len(), 2);

        let est = &config.relatorios["estabelecimentos"];
        assert_eq!(est.chave_item, "estabelecimento");
        assert_eq!(est.tentativas, 2);
        assert!(matches!(est.fonte, Fonte::Json { .. }));
        assert!(matches!(est.itens, Itens::Consulta { .. }));
        assert_eq!(est.transformacao.renomear["noFantasia"], "nome_fantasia");
        assert_eq!(est.transformacao.tipos["qt_consultas"], Tipo::Inteiro);
        assert_eq!(est.verificacoes.len(), 1);

        let prod = &config.relatorios["producao"];
        assert!(matches!(prod.itens, Itens::Geografia));
        assert_eq!(prod.fonte.delimitador(), Some(';'));
    }

    #[test]
    fn url_vazia_rejeitada() {
        let toml_str = r#"
            [quebrado]
            url = ""
            [quebrado.fonte]
            tipo = "json"
            [quebrado.transformacao]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::Configuracao(_)));
    }

    #[test]
    fn delimitador_longo_rejeitado() {
        let toml_str = r#"
            [quebrado]
            url = "https://x"
            [quebrado.fonte]
            tipo = "formulario"
            url_sessao = "https://x"
            campo_token = "t"
            linhas_cabecalho = 0
            linhas_rodape = 0
            delimitador = ";;"
            [quebrado.transformacao]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tipo_desconhecido_nao_desserializa() {
        let toml_str = r#"
            [r]
            url = "https://x"
            [r.fonte]
            tipo = "json"
            [r.transformacao.tipos]
            qt = "data"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn modelo_resolvido_por_marcadores() {
        let url = resolver_modelo(
            "https://x/{geografia}/{item}?c={competencia}",
            &[
                ("geografia", "120001"),
                ("item", "55"),
                ("competencia", "202406"),
            ],
        )
        .unwrap();
        assert_eq!(url, "https://x/120001/55?c=202406");
    }

    #[test]
    fn marcador_sobrando_gera_erro() {
        let err = resolver_modelo("https://x/{pagina}", &[("geografia", "1")]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuracao(_)));
    }
}
