//! Interactive operator menu read from stdin

use anyhow::Context;
use blockswap_core::BlockId;
use blockswap_network::Network;
use blockswap_store::{BlockStorage, LocalBlockStore};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const MENU: &str = "\
1 - Publish peer URI
2 - Publish CID
3 - Put data from a file
4 - Find providers
0 - Exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    PublishUri,
    PublishBlock,
    PutFile,
    FindProviders,
    Exit,
}

impl Choice {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "1" => Some(Self::PublishUri),
            "2" => Some(Self::PublishBlock),
            "3" => Some(Self::PutFile),
            "4" => Some(Self::FindProviders),
            "0" => Some(Self::Exit),
            _ => None,
        }
    }
}

pub struct Menu<'a> {
    network: &'a Network,
    store: &'a LocalBlockStore,
    input: Lines<BufReader<Stdin>>,
}

impl<'a> Menu<'a> {
    pub fn new(network: &'a Network, store: &'a LocalBlockStore) -> Self {
        Self {
            network,
            store,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Loop until the operator exits or stdin closes
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            println!("{}", MENU);
            let Some(line) = self.input.next_line().await? else {
                return Ok(());
            };

            let choice = match Choice::parse(&line) {
                Some(Choice::Exit) => return Ok(()),
                Some(choice) => choice,
                None => {
                    println!("Bad value");
                    continue;
                }
            };

            if let Err(e) = self.execute(choice).await {
                println!("Error: {:#}", e);
            }
        }
    }

    async fn execute(&mut self, choice: Choice) -> anyhow::Result<()> {
        match choice {
            Choice::PublishUri => {
                let uri = self.network.public_uri();
                self.network.publish_uri(&uri).await?;
                println!("Published {}", uri);
            }
            Choice::PublishBlock => {
                let block = self.prompt_block().await?;
                if !self.store.has(&block) {
                    println!("The data is not in storage");
                    return Ok(());
                }
                self.network.announce_provider(&block).await?;
                println!("Published {}", block);
            }
            Choice::PutFile => {
                let path = self.prompt("Enter the path to the file:").await?;
                let path = Path::new(path.trim());
                if !path.is_file() {
                    println!("Bad file path");
                    return Ok(());
                }

                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let block = BlockId::for_data(&data)?;
                if self.store.put_if_absent(&block, &data).await? {
                    println!("Data saved");
                } else {
                    println!("The data is already in storage");
                }
                println!("CID: {}", block);
            }
            Choice::FindProviders => {
                let block = self.prompt_block().await?;
                let providers = self.network.find_providers(&block).await?;
                if providers.is_empty() {
                    println!("No providers found");
                }
                for peer in providers {
                    println!("{}", peer);
                }
            }
            Choice::Exit => {}
        }
        Ok(())
    }

    async fn prompt(&mut self, question: &str) -> anyhow::Result<String> {
        println!("{}", question);
        self.input
            .next_line()
            .await?
            .context("stdin closed")
    }

    async fn prompt_block(&mut self) -> anyhow::Result<BlockId> {
        let line = self.prompt("Enter CID:").await?;
        line.trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Bad value: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_parse() {
        assert_eq!(Choice::parse("1"), Some(Choice::PublishUri));
        assert_eq!(Choice::parse(" 3\n"), Some(Choice::PutFile));
        assert_eq!(Choice::parse("0"), Some(Choice::Exit));
        assert_eq!(Choice::parse("5"), None);
        assert_eq!(Choice::parse("publish"), None);
    }
}
