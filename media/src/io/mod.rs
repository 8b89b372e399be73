pub mod packet_dump;
