//! # Captura de Portais Públicos de Saúde
//!
//! ## Visão Geral
//! Extração de dados de portais governamentais de saúde (registros de
//! estabelecimentos, produção da atenção primária), normalização via Polars
//! com base em configurações dinâmicas e carga num armazém PostgreSQL.
//!
//! ## Princípios de Engenharia
//! - **Resiliência (Fail-Soft)**: a falha de uma unidade de trabalho não aborta a corrida.
//! - **Observabilidade**: logs estruturados em cada fronteira de etapa; erros persistidos no armazém.
//! - **Idempotência**: recargas removem a fatia anterior antes de inserir; o histórico de captura
//!   evita reextração do que já foi concluído.

mod armazem;
mod carregador;
mod errors;
mod extrator;
mod impl_errors;
mod models;
mod pipeline;
mod sessao;
mod tabular;
mod transformador;
mod validador;

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sqlx::PgPool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::models::{Config, UnidadeTrabalho};
use crate::pipeline::Desfecho;

#[derive(Parser, Debug)]
#[command(
    name = "saude_gov",
    about = "Captura relatórios de portais públicos de saúde para o armazém"
)]
struct Args {
    /// Caminho do catálogo TOML de relatórios
    #[arg(long, default_value = "relatorios.toml")]
    config: String,

    /// Restringe a corrida a uma única operação do catálogo
    #[arg(long)]
    operacao: Option<String>,

    /// Executa o pipeline inteiro e desfaz a transação de carga ao final
    #[arg(long, default_value = "false")]
    modo_teste: bool,

    /// Diretório de estágio físico das tabelas brutas
    #[arg(long, default_value = "dados")]
    dados: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let global_timer = Instant::now();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("saude_gov=info")),
        )
        .init();

    let args = Args::parse();

    println!("--- INICIANDO CAPTURA ---");

    let config = match Config::load_from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Erro na carga do catálogo: {}", e);
            std::process::exit(1);
        }
    };

    // Reuso de conexões/Keep-alive para toda a corrida
    let cliente = sessao::criar_cliente()?;
    let pool = armazem::conectar().await?;

    let agenda = armazem::agenda_pendente(&pool, args.operacao.as_deref()).await?;
    if agenda.is_empty() {
        println!("Nenhuma unidade pendente na agenda.");
        return Ok(());
    }

    info!(
        unidades = agenda.len(),
        modo_teste = args.modo_teste,
        "agenda carregada"
    );

    let barra = ProgressBar::new(agenda.len() as u64);
    barra.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut carregadas = 0usize;
    let mut falharam = 0usize;

    for entrada in agenda {
        if let Some(anterior) = entrada.ultima_captura {
            info!(
                operacao = entrada.operacao,
                ultima_captura = %anterior,
                "unidade reaberta; recarga substituirá a fatia anterior"
            );
        }
        let unidade = UnidadeTrabalho::from(entrada);
        barra.set_message(format!(
            "{} {} {}",
            unidade.operacao, unidade.competencia, unidade.geografia
        ));

        let Some(relatorio) = config.relatorios.get(&unidade.operacao) else {
            warn!(
                operacao = unidade.operacao,
                "operação agendada sem entrada no catálogo"
            );
            registrar_falha(&pool, &unidade, "configuracao", "operação ausente no catálogo").await;
            falharam += 1;
            barra.inc(1);
            continue;
        };

        let step_timer = Instant::now();
        let desfecho = pipeline::executar(
            &cliente,
            &pool,
            relatorio,
            &unidade,
            args.modo_teste,
            &args.dados,
        )
        .await;

        match &desfecho {
            Desfecho::Carregada {
                linhas,
                sem_dados,
                falhas_itens,
            } => {
                if args.modo_teste {
                    info!(linhas, "modo de teste: histórico e agenda não avançam");
                } else {
                    if let Err(erro) = armazem::registrar_captura(&pool, &unidade, *linhas).await {
                        error!(erro = %erro, "histórico de captura não registrado");
                    }
                    if let Err(erro) = armazem::avancar_agenda(&pool, &unidade).await {
                        error!(erro = %erro, "agenda não avançada");
                    }
                }
                info!(
                    linhas,
                    sem_dados,
                    falhas_itens,
                    tempo = ?step_timer.elapsed(),
                    "unidade carregada"
                );
                carregadas += 1;
            }

            outro => {
                let detalhe = outro.detalhe().unwrap_or("sem detalhe");
                error!(
                    etapa = outro.etapa(),
                    detalhe,
                    tempo = ?step_timer.elapsed(),
                    "unidade falhou; a corrida continua"
                );
                registrar_falha(&pool, &unidade, outro.etapa(), detalhe).await;
                falharam += 1;
            }
        }

        barra.inc(1);
    }

    barra.finish_and_clear();

    println!("\n==========================================");
    println!(
        "Fim da captura: {} carregadas, {} com falha",
        carregadas, falharam
    );
    println!("Tempo de execução: {:.2?}", global_timer.elapsed());
    println!("==========================================");

    Ok(())
}

/// A persistência de erro nunca derruba a corrida; o log fica de último recurso.
async fn registrar_falha(pool: &PgPool, unidade: &UnidadeTrabalho, etapa: &str, detalhe: &str) {
    if let Err(erro) = armazem::registrar_erro(pool, unidade, etapa, detalhe).await {
        error!(erro = %erro, etapa, "falha ao persistir o erro da unidade");
    }
}
