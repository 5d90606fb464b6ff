//! Interface de linha de comando do stemsplit baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (serve, submit, watch)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::client::DEFAULT_SERVER;

/// stemsplit — separação de faixas de áudio em stems com acompanhamento de progresso.
#[derive(Debug, Parser)]
#[command(name = "stemsplit", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./stemsplit.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia o servidor HTTP.
    Serve {
        /// Endereço de escuta (sobrepõe o arquivo de configuração).
        #[arg(long)]
        host: Option<String>,

        /// Porta de escuta (sobrepõe o arquivo de configuração e `PORT`).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Envia um arquivo de áudio para separação.
    Submit {
        /// Arquivo de áudio a separar.
        file: PathBuf,

        /// URL base do servidor.
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,

        /// Retorna logo após o envio, sem acompanhar o progresso.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },

    /// Acompanha o progresso de um job existente.
    Watch {
        /// Identificador retornado pelo envio.
        job_id: String,

        /// URL base do servidor.
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}
