use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use dialoguer::Input;

use crate::config::{self, Config};
use crate::core::canonical::{canonicalize, direct_url};
use crate::core::resolver::Resolver;
use crate::models::{LinkState, MetadataRecord, Service};
use crate::sources::og::OgFetcher;
use crate::sources::Catalogs;

#[derive(Parser)]
#[command(name = "musiclink", about = "Поиск трека или альбома по ссылке на всех музыкальных сервисах")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Подробный вывод (уровень debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Разобрать ссылку и найти релиз на остальных сервисах
    Resolve {
        /// Ссылка на трек или альбом
        url: String,
        /// Вывести результат в JSON
        #[arg(long)]
        json: bool,
        /// Сохранить загруженный <head> страницы в файл
        #[arg(long, value_name = "PATH")]
        dump_html: Option<PathBuf>,
    },
    /// Показать, как распознаётся ссылка (без сетевых запросов)
    Parse {
        /// Ссылка на трек или альбом
        url: String,
    },
    /// Настроить токены и ключи сервисов
    Config,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Resolve {
            url,
            json,
            dump_html,
        } => cmd_resolve(&url, json, dump_html),
        Commands::Parse { url } => cmd_parse(&url),
        Commands::Config => cmd_config(),
    }
}

fn cmd_resolve(url: &str, json: bool, dump_html: Option<PathBuf>) -> Result<()> {
    let cfg = config::load_config();
    let fetcher = OgFetcher::new(&cfg)?.with_dump(dump_html);
    let catalogs = Catalogs::from_config(&cfg);
    log::debug!("подключены каталоги: {:?}", catalogs.services());

    let record = Resolver::new(&fetcher, &catalogs).resolve_url(url)?;

    if json {
        let out = serde_json::to_string_pretty(&record.to_json())
            .context("не удалось сериализовать результат")?;
        println!("{}", out);
        return Ok(());
    }

    print_record(&record);
    Ok(())
}

fn print_record(record: &MetadataRecord) {
    let mut table = Table::new();
    table.set_header(vec!["Поле", "Значение"]);
    let entity = &record.entity;
    let fields = [
        ("Название", record.title.as_deref()),
        ("Исполнитель", record.artist.as_deref()),
        ("Альбом", record.album.as_deref()),
        ("Год", record.year.as_deref()),
        ("Обложка", record.image.as_deref()),
        ("Сервис", Some(entity.service.display_name())),
        ("Тип", Some(entity.kind.as_str())),
        ("ID трека", entity.track_id.as_deref()),
        ("ID альбома", entity.album_id.as_deref()),
        ("Итоговая ссылка", Some(record.resolved_url.as_str())),
    ];
    for (name, value) in fields {
        table.add_row(vec![Cell::new(name), Cell::new(value.unwrap_or("-"))]);
    }
    println!("{table}");

    let mut links = Table::new();
    links.set_header(vec!["Сервис", "Ссылка"]);
    for service in Service::ALL {
        let state = match record.link(service) {
            LinkState::Found(url) => url.as_str(),
            LinkState::NotFound => "не найдено",
            LinkState::Unresolved => "-",
        };
        links.add_row(vec![Cell::new(service.display_name()), Cell::new(state)]);
    }
    println!("{links}");

    if record.raw_tags.is_empty() {
        return;
    }
    let mut raw = Table::new();
    raw.set_header(vec!["Тег", "Значение"]);
    for (key, value) in &record.raw_tags {
        raw.add_row(vec![Cell::new(key), Cell::new(value)]);
    }
    println!("\nТеги страницы:\n{raw}");
}

fn cmd_parse(url: &str) -> Result<()> {
    let entity = canonicalize(url.trim());
    if entity.service == Service::Unknown {
        println!("Ссылка не распознана: {}", url);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Поле", "Значение"]);
    let rows = [
        ("Сервис", Some(entity.service.display_name().to_string())),
        ("Тип", Some(entity.kind.to_string())),
        ("ID трека", entity.track_id.clone()),
        ("ID альбома", entity.album_id.clone()),
        ("Ключ доступа", entity.access_key.clone()),
        ("Прямая ссылка", direct_url(&entity)),
    ];
    for (name, value) in rows {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(value.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn prompt(label: &str, current: Option<&str>) -> Result<Option<String>> {
    let value: String = Input::new()
        .with_prompt(label)
        .with_initial_text(current.unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    let value = value.trim();
    Ok(if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    })
}

fn cmd_config() -> Result<()> {
    // Environment overrides are not written back to the file.
    let path = config::config_path();
    let mut cfg: Config = config::load_from(&path);

    println!("Настройка сервисов ({})", path.display());
    println!("Пустое значение отключает параметр.\n");

    println!("Spotify (ключи: https://developer.spotify.com/dashboard)");
    cfg.spotify.client_id = prompt("Client ID", cfg.spotify.client_id.as_deref())?;
    cfg.spotify.client_secret = prompt("Client Secret", cfg.spotify.client_secret.as_deref())?;
    cfg.spotify.market = prompt("Рынок (например, KZ)", cfg.spotify.market.as_deref())?;

    println!("\nЯндекс Музыка");
    cfg.yandex.token = prompt("OAuth-токен", cfg.yandex.token.as_deref())?;

    println!("\nVK Музыка");
    cfg.vk.access_token = prompt("access_token", cfg.vk.access_token.as_deref())?;

    println!("\nApple Music");
    cfg.apple.storefront = prompt("Витрина (страна)", Some(cfg.apple.storefront()))?;

    config::save_config(&cfg)?;
    println!("\nНастройки сохранены: {}", path.display());
    Ok(())
}
